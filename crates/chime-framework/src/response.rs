//! The object listener callbacks use to answer a message.
//!
//! Every outbound action on a [`Response`] (`send`, `emote`, `reply`,
//! `topic`, `play`) goes through the robot's response chain first:
//!
//! ```text
//! res.send(["hi"])
//!   → ResponseContext { method: Send, plaintext: true, strings: ["hi"] }
//!   → response middleware (may rewrite strings or switch method)
//!   → adapter.<final method>(envelope, final strings)
//! ```
//!
//! If the middleware leaves no strings behind, the adapter is not called.

use std::fmt;
use std::sync::Arc;

use chime_core::{AdapterResult, Envelope, Message};
use rand::seq::IndexedRandom;
use tracing::trace;

use crate::context::{Method, ResponseContext};
use crate::listener::MatchResult;
use crate::robot::Robot;

/// A message being answered, plus the match that selected it.
#[derive(Clone)]
pub struct Response {
    robot: Robot,
    message: Arc<Message>,
    matched: Option<MatchResult>,
    envelope: Envelope,
}

impl Response {
    /// Creates a response for `message`.
    pub fn new(robot: Robot, message: Arc<Message>, matched: Option<MatchResult>) -> Self {
        let envelope = Envelope::for_message(&message);
        Self {
            robot,
            message,
            matched,
            envelope,
        }
    }

    /// Returns the robot.
    pub fn robot(&self) -> &Robot {
        &self.robot
    }

    /// Returns the message being answered.
    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Returns what the listener's matcher found.
    pub fn matched(&self) -> Option<&MatchResult> {
        self.matched.as_ref()
    }

    /// Returns the envelope outbound actions are addressed to.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Replaces the message, readdressing the envelope.
    ///
    /// Receive middleware uses this to rewrite what listeners see.
    pub fn set_message(&mut self, message: Arc<Message>) {
        self.envelope = Envelope::for_message(&message);
        self.message = message;
    }

    /// Swaps a catch-all wrapper for the message it wraps.
    pub(crate) fn unwrap_catch_all(&mut self) {
        if let Some(inner) = self.message.wrapped().cloned() {
            self.set_message(inner);
        }
    }

    /// Posts `strings` to the room.
    pub async fn send<I, S>(&self, strings: I) -> AdapterResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(Method::Send, collect(strings)).await
    }

    /// Posts `strings` as emotes.
    pub async fn emote<I, S>(&self, strings: I) -> AdapterResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(Method::Emote, collect(strings)).await
    }

    /// Posts `strings` addressed to the sender.
    pub async fn reply<I, S>(&self, strings: I) -> AdapterResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(Method::Reply, collect(strings)).await
    }

    /// Sets the room topic.
    pub async fn topic<I, S>(&self, strings: I) -> AdapterResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(Method::Topic, collect(strings)).await
    }

    /// Plays sounds in the room.
    pub async fn play<I, S>(&self, strings: I) -> AdapterResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(Method::Play, collect(strings)).await
    }

    /// Picks a random element of `items`.
    pub fn random<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut rand::rng())
    }

    /// Marks the message as handled; no further listener will see it.
    pub fn finish(&self) {
        self.message.finish();
    }

    async fn dispatch(&self, method: Method, strings: Vec<String>) -> AdapterResult<()> {
        let ctx = self
            .robot
            .response_chain()
            .execute(ResponseContext::new(self.clone(), method, strings))
            .await;

        trace!(method = %ctx.method, count = ctx.strings.len(), "Delivering response");

        let adapter = self.robot.adapter();
        let envelope = ctx.response.envelope();
        let strings = &ctx.strings;
        match ctx.method {
            Method::Send => adapter.send(envelope, strings).await,
            Method::Emote => adapter.emote(envelope, strings).await,
            Method::Reply => adapter.reply(envelope, strings).await,
            Method::Topic => adapter.topic(envelope, strings).await,
            Method::Play => adapter.play(envelope, strings).await,
        }
    }
}

fn collect<I, S>(strings: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    strings.into_iter().map(Into::into).collect()
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("robot", &self.robot.name())
            .field("message", &self.message)
            .field("matched", &self.matched)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Flow;
    use crate::testing::{TestAdapter, text_message};

    fn response_for(robot: &Robot, text: &str) -> Response {
        Response::new(robot.clone(), Arc::new(text_message("u1", text)), None)
    }

    #[tokio::test]
    async fn test_actions_reach_adapter() {
        let (robot, adapter) = TestAdapter::robot();
        let res = response_for(&robot, "hi");

        res.send(["one", "two"]).await.unwrap();
        res.reply(vec![String::from("three")]).await.unwrap();
        res.emote(["waves"]).await.unwrap();

        assert_eq!(
            adapter.calls(),
            vec![
                ("send".to_string(), vec!["one".to_string(), "two".to_string()]),
                ("reply".to_string(), vec!["three".to_string()]),
                ("emote".to_string(), vec!["waves".to_string()]),
            ]
        );
        assert_eq!(adapter.last_room().as_deref(), Some("general"));
    }

    #[tokio::test]
    async fn test_response_middleware_rewrites() {
        let (robot, adapter) = TestAdapter::robot();
        robot.response_middleware(|ctx: &mut ResponseContext| {
            if ctx.plaintext {
                ctx.strings.iter_mut().for_each(|s| *s = s.to_uppercase());
            }
            if ctx.method == Method::Send {
                ctx.method = Method::Reply;
            }
            Flow::Continue
        });

        let res = response_for(&robot, "hi");
        res.send(["quiet"]).await.unwrap();
        res.play(["drum"]).await.unwrap();

        assert_eq!(
            adapter.calls(),
            vec![
                ("reply".to_string(), vec!["QUIET".to_string()]),
                ("play".to_string(), vec!["drum".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_strings_still_reach_adapter() {
        let (robot, adapter) = TestAdapter::robot();
        robot.response_middleware(|ctx: &mut ResponseContext| {
            ctx.strings.retain(|s| !s.contains("secret"));
            Flow::Continue
        });

        let res = response_for(&robot, "hi");
        res.send(["the secret plan"]).await.unwrap();
        res.play(Vec::<String>::new()).await.unwrap();

        assert_eq!(
            adapter.calls(),
            vec![
                ("send".to_string(), Vec::<String>::new()),
                ("play".to_string(), Vec::<String>::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_random_and_finish() {
        let (robot, _adapter) = TestAdapter::robot();
        let res = response_for(&robot, "hi");

        let items = ["a", "b", "c"];
        assert!(items.contains(res.random(&items).unwrap()));
        assert!(res.random::<&str>(&[]).is_none());

        assert!(!res.message().is_done());
        res.finish();
        assert!(res.message().is_done());
    }

    #[tokio::test]
    async fn test_set_message_readdresses_envelope() {
        let (robot, _adapter) = TestAdapter::robot();
        let mut res = response_for(&robot, "hi");

        let user = chime_core::User::new("u2");
        user.set_attr("room", "random");
        res.set_message(Arc::new(Message::text(Arc::new(user), "moved", "2")));

        assert_eq!(res.envelope().room.as_deref(), Some("random"));
        assert_eq!(res.message().text_content(), Some("moved"));
    }
}
