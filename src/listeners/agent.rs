//! Reactive agent dispatcher
//!
//! The bot answers comments under its own posts, replies to its own
//! comments, comments addressed to it, private messages addressed to it,
//! and summarizes new posts.
//! Anything the bot itself authored is ignored, so its own output never
//! triggers it again.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{self, CompletionRequest, TextGenerator};
use crate::config::AgentConfig;
use crate::data::{Database, NewPost, Post};
use crate::error::AppError;
use crate::events::{DomainEvent, EventEnvelope};
use crate::metrics::AGENT_REPLIES_TOTAL;
use crate::service::{CommentDraft, CommentService, MessageService, PostService};

pub struct AgentDispatcher {
    db: Arc<Database>,
    generator: Arc<dyn TextGenerator>,
    comments: Arc<CommentService>,
    messages: Arc<MessageService>,
    posts: Arc<PostService>,
    bot_id: String,
    config: AgentConfig,
}

impl AgentDispatcher {
    pub fn new(
        db: Arc<Database>,
        generator: Arc<dyn TextGenerator>,
        comments: Arc<CommentService>,
        messages: Arc<MessageService>,
        posts: Arc<PostService>,
        bot_id: String,
        config: AgentConfig,
    ) -> Self {
        Self {
            db,
            generator,
            comments,
            messages,
            posts,
            bot_id,
            config,
        }
    }

    /// How long a new post settles before it is summarized
    pub fn summary_delay(&self) -> Duration {
        if self.config.summarize_posts {
            Duration::from_millis(self.config.summary_delay_ms)
        } else {
            Duration::ZERO
        }
    }

    fn is_self_authored(&self, envelope: &EventEnvelope) -> bool {
        envelope.event.actor_id() == self.bot_id
    }

    /// Generate text, falling back to the configured reply when allowed.
    async fn generate(
        &self,
        trigger: &'static str,
        request: CompletionRequest,
        allow_fallback: bool,
    ) -> Result<String, AppError> {
        let error = match self.generator.complete(request).await {
            Ok(text) => {
                AGENT_REPLIES_TOTAL
                    .with_label_values(&[trigger, "generated"])
                    .inc();
                return Ok(text);
            }
            Err(error) => error,
        };

        match self.config.fallback_reply.as_ref().filter(|_| allow_fallback) {
            Some(fallback) => {
                tracing::warn!(
                    trigger,
                    error = %error,
                    "Text generation failed, using fallback reply"
                );
                AGENT_REPLIES_TOTAL
                    .with_label_values(&[trigger, "fallback"])
                    .inc();
                Ok(fallback.clone())
            }
            None => {
                AGENT_REPLIES_TOTAL
                    .with_label_values(&[trigger, "failed"])
                    .inc();
                Err(error)
            }
        }
    }

    /// Reply to a comment left under a bot post or on a bot comment.
    pub async fn on_comment_created(&self, envelope: &EventEnvelope) -> Result<(), AppError> {
        let DomainEvent::CommentCreated {
            comment_id,
            post_id,
            author_id,
            parent_id,
            reply_to_uid,
            content,
            post_author_id,
            parent_author_id,
            ..
        } = &envelope.event
        else {
            return Ok(());
        };
        if self.is_self_authored(envelope) {
            tracing::debug!(event_id = %envelope.id, comment_id, "Ignoring the bot's own comment");
            return Ok(());
        }

        let on_bot_post = *post_author_id == self.bot_id;
        let bot = Some(self.bot_id.as_str());
        let replying_to_bot = parent_author_id.as_deref() == bot || reply_to_uid.as_deref() == bot;
        if !on_bot_post && !replying_to_bot {
            return Ok(());
        }

        let Some(post) = self.db.get_post(*post_id).await?.filter(|p| !p.is_deleted) else {
            tracing::debug!(post_id, "Post gone before the bot could reply");
            return Ok(());
        };
        let parent_content = if *parent_id == 0 {
            None
        } else {
            self.db
                .get_comment(*parent_id)
                .await?
                .map(|parent| parent.body.text().to_string())
        };

        let request = agent::comment_reply_request(
            &self.config.reply_persona,
            &post.content,
            parent_content.as_deref(),
            content,
        );
        let reply = self.generate("comment", request, true).await?;

        let draft = CommentDraft {
            reply_to_uid: Some(author_id.clone()),
            ..CommentDraft::reply(*post_id, *comment_id, reply)
        };
        let published = self.comments.publish(&self.bot_id, draft).await?;

        tracing::info!(
            event_id = %envelope.id,
            source_comment_id = comment_id,
            reply_comment_id = published.id,
            root_parent_id = published.root_parent_id,
            "Bot replied to comment"
        );
        Ok(())
    }

    /// Continue a private conversation with the bot.
    pub async fn on_message_sent(&self, envelope: &EventEnvelope) -> Result<(), AppError> {
        let DomainEvent::MessageSent {
            sender_id,
            receiver_id,
            ..
        } = &envelope.event
        else {
            return Ok(());
        };
        if self.is_self_authored(envelope) || *receiver_id != self.bot_id {
            return Ok(());
        }

        let history = self
            .db
            .list_recent_messages_between(sender_id, &self.bot_id, self.config.context_window)
            .await?;
        let request = agent::chat_request(
            &self.config.chat_persona,
            &self.bot_id,
            &history,
            self.config.max_message_chars,
        );
        let reply = self.generate("chat", request, true).await?;

        let sent = self.messages.send(&self.bot_id, sender_id, &reply).await?;
        tracing::info!(
            event_id = %envelope.id,
            message_id = sent.id,
            context_messages = history.len(),
            "Bot replied to private message"
        );
        Ok(())
    }

    /// Summarize a new post as a bot floor comment.
    pub async fn on_post_created(&self, envelope: &EventEnvelope) -> Result<(), AppError> {
        let DomainEvent::PostCreated {
            post_id, content, ..
        } = &envelope.event
        else {
            return Ok(());
        };
        if !self.config.summarize_posts || self.is_self_authored(envelope) {
            return Ok(());
        }
        if content.trim().chars().count() < self.config.summary_min_chars {
            tracing::debug!(post_id, "Post too short to summarize");
            return Ok(());
        }

        let request = agent::summary_request(&self.config.summary_persona, content);
        let summary = self.generate("summary", request, false).await?;

        match self
            .comments
            .publish(&self.bot_id, CommentDraft::floor(*post_id, summary))
            .await
        {
            Ok(comment) => {
                tracing::info!(post_id, comment_id = comment.id, "Bot summary published");
                Ok(())
            }
            // Deleted while the summary was being generated
            Err(AppError::NotFound("post")) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Generate and publish one bulletin post as the bot.
    pub async fn publish_bulletin(&self) -> Result<Post, AppError> {
        let bulletin = &self.config.bulletin;
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let request = agent::bulletin_request(
            &self.config.summary_persona,
            &bulletin.prompt,
            &date,
            bulletin.location.as_deref(),
        );
        let content = self.generate("bulletin", request, false).await?;

        let post = self
            .posts
            .create(
                &self.bot_id,
                NewPost {
                    content,
                    location: bulletin.location.clone(),
                    tags: bulletin.tags.clone(),
                    ..NewPost::default()
                },
            )
            .await?;

        tracing::info!(post_id = post.id, "Bot bulletin published");
        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ChatMessage, MockTextGenerator, Role};
    use crate::config::tests::valid_config;
    use crate::data::{Comment, PageRequest, User, UserRole};
    use crate::events::EventBus;
    use crate::service::Hydrator;
    use tempfile::TempDir;

    const BOT: &str = "campus-bot";

    struct Fixture {
        dispatcher: AgentDispatcher,
        db: Arc<Database>,
        comments: Arc<CommentService>,
        messages: Arc<MessageService>,
        _temp_dir: TempDir,
    }

    async fn fixture(generator: MockTextGenerator, fallback: Option<&str>) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        for (id, role) in [("alice", UserRole::User), (BOT, UserRole::Bot)] {
            db.upsert_user(&User {
                id: id.to_string(),
                name: id.to_string(),
                avatar: None,
                role,
                enabled: true,
                muted_until: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let mut config = valid_config();
        config.agent.fallback_reply = fallback.map(str::to_string);
        config.agent.summarize_posts = true;
        config.agent.context_window = 2;
        config.agent.max_message_chars = 5;

        // Never started: events published by the services stay queued
        let events = Arc::new(EventBus::new(1));
        let hydrator = Arc::new(Hydrator::new(db.clone(), config.feed.clone()));
        let comments = Arc::new(CommentService::new(
            db.clone(),
            events.clone(),
            hydrator.clone(),
            50,
        ));
        let messages = Arc::new(MessageService::new(
            db.clone(),
            events.clone(),
            hydrator.clone(),
            BOT.to_string(),
            50,
        ));
        let posts = Arc::new(PostService::new(db.clone(), events, hydrator, 50));

        Fixture {
            dispatcher: AgentDispatcher::new(
                db.clone(),
                Arc::new(generator),
                comments.clone(),
                messages.clone(),
                posts,
                BOT.to_string(),
                config.agent,
            ),
            db,
            comments,
            messages,
            _temp_dir: temp_dir,
        }
    }

    fn comment_event(
        comment: &Comment,
        post_author: &str,
        parent_author: Option<&str>,
    ) -> EventEnvelope {
        EventEnvelope::new(DomainEvent::CommentCreated {
            comment_id: comment.id,
            post_id: comment.post_id,
            author_id: comment.author_id.clone(),
            parent_id: comment.parent_id,
            root_parent_id: comment.root_parent_id,
            reply_to_uid: comment.reply_to_uid.clone(),
            content: comment.body.text().to_string(),
            post_author_id: post_author.to_string(),
            parent_author_id: parent_author.map(str::to_string),
        })
    }

    async fn bot_post(db: &Database) -> Post {
        db.insert_post(
            BOT,
            &NewPost {
                content: "Good morning campus".to_string(),
                ..NewPost::default()
            },
            Utc::now(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn replies_under_the_commented_floor() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .withf(|request| {
                request.messages.len() == 4
                    && request.messages[1].content == "Post content: Good morning campus"
                    && request.messages[3].content == "morning!"
            })
            .times(1)
            .returning(|_| Ok("hello alice".to_string()));
        let f = fixture(generator, None).await;
        let post = bot_post(&f.db).await;
        let floor = f
            .comments
            .publish("alice", CommentDraft::floor(post.id, "morning!"))
            .await
            .unwrap();

        f.dispatcher
            .on_comment_created(&comment_event(&floor, BOT, None))
            .await
            .unwrap();

        let replies = f.db.list_replies(floor.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].author_id, BOT);
        assert_eq!(replies[0].parent_id, floor.id);
        assert_eq!(replies[0].root_parent_id, floor.id);
        assert_eq!(replies[0].reply_to_uid.as_deref(), Some("alice"));
        assert_eq!(replies[0].body.text(), "hello alice");
    }

    #[tokio::test]
    async fn own_comments_never_trigger_generation() {
        let mut generator = MockTextGenerator::new();
        generator.expect_complete().times(0);
        let f = fixture(generator, None).await;
        let post = bot_post(&f.db).await;
        let floor = f
            .comments
            .publish(BOT, CommentDraft::floor(post.id, "talking to myself"))
            .await
            .unwrap();

        f.dispatcher
            .on_comment_created(&comment_event(&floor, BOT, None))
            .await
            .unwrap();

        assert!(f.db.list_replies(floor.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrelated_comments_are_ignored() {
        let mut generator = MockTextGenerator::new();
        generator.expect_complete().times(0);
        let f = fixture(generator, None).await;
        let post = f
            .db
            .insert_post(
                "alice",
                &NewPost {
                    content: "my post".to_string(),
                    ..NewPost::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let floor = f
            .comments
            .publish("alice", CommentDraft::floor(post.id, "bump"))
            .await
            .unwrap();

        tokio_test::assert_ok!(
            f.dispatcher
                .on_comment_created(&comment_event(&floor, "alice", None))
                .await
        );
    }

    #[tokio::test]
    async fn reply_addressed_to_the_bot_triggers_a_reply() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .times(1)
            .returning(|_| Ok("noted".to_string()));
        let f = fixture(generator, None).await;
        let post = f
            .db
            .insert_post(
                "alice",
                &NewPost {
                    content: "lost my umbrella".to_string(),
                    ..NewPost::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let floor = f
            .comments
            .publish("alice", CommentDraft::floor(post.id, "anyone?"))
            .await
            .unwrap();
        let mention = f
            .comments
            .publish(
                "alice",
                CommentDraft {
                    reply_to_uid: Some(BOT.to_string()),
                    ..CommentDraft::reply(post.id, floor.id, "bot, seen it?")
                },
            )
            .await
            .unwrap();

        f.dispatcher
            .on_comment_created(&comment_event(&mention, "alice", Some("alice")))
            .await
            .unwrap();

        let replies = f.db.list_replies(floor.id).await.unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].author_id, BOT);
        assert_eq!(replies[1].parent_id, mention.id);
        assert_eq!(replies[1].reply_to_uid.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn chat_replays_window_oldest_first() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .withf(|request| {
                request.messages
                    == vec![
                        ChatMessage::system("chat"),
                        ChatMessage::assistant("hey!"),
                        ChatMessage::user("how a"),
                    ]
            })
            .times(1)
            .returning(|_| Ok("all good".to_string()));
        let f = fixture(generator, None).await;
        f.messages.send("alice", BOT, "hi").await.unwrap();
        f.messages.send(BOT, "alice", "hey!").await.unwrap();
        let last = f.messages.send("alice", BOT, "how are you").await.unwrap();

        f.dispatcher
            .on_message_sent(&EventEnvelope::new(DomainEvent::MessageSent {
                message_id: last.id,
                sender_id: "alice".to_string(),
                receiver_id: BOT.to_string(),
                content: last.content.clone(),
                sent_at: last.created_at,
            }))
            .await
            .unwrap();

        let history = f
            .messages
            .history("alice", BOT, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(history[0].sender_id, BOT);
        assert_eq!(history[0].content, "all good");
    }

    #[tokio::test]
    async fn chat_failure_uses_fallback_when_configured() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .times(1)
            .returning(|_| Err(AppError::ExternalService("timeout".to_string())));
        let f = fixture(generator, Some("busy, later~")).await;
        let sent = f.messages.send("alice", BOT, "hi").await.unwrap();

        f.dispatcher
            .on_message_sent(&EventEnvelope::new(DomainEvent::MessageSent {
                message_id: sent.id,
                sender_id: "alice".to_string(),
                receiver_id: BOT.to_string(),
                content: sent.content.clone(),
                sent_at: sent.created_at,
            }))
            .await
            .unwrap();

        let history = f.messages.history(BOT, "alice", PageRequest::default()).await.unwrap();
        assert_eq!(history[0].content, "busy, later~");
    }

    #[tokio::test]
    async fn summary_failure_is_reported_without_fallback() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .withf(|request| request.messages[0].role == Role::System)
            .times(1)
            .returning(|_| Err(AppError::ExternalService("down".to_string())));
        let f = fixture(generator, Some("fallback")).await;
        let post = f
            .db
            .insert_post(
                "alice",
                &NewPost {
                    content: "Where is the best coffee?".to_string(),
                    ..NewPost::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let result = f
            .dispatcher
            .on_post_created(&EventEnvelope::new(DomainEvent::PostCreated {
                post_id: post.id,
                author_id: "alice".to_string(),
                content: post.content.clone(),
                is_anonymous: false,
            }))
            .await;

        assert!(matches!(result, Err(AppError::ExternalService(_))));
        assert!(f
            .db
            .list_floors(post.id, PageRequest::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn short_posts_are_not_summarized() {
        let mut generator = MockTextGenerator::new();
        generator.expect_complete().times(0);
        let f = fixture(generator, None).await;

        tokio_test::assert_ok!(
            f.dispatcher
                .on_post_created(&EventEnvelope::new(DomainEvent::PostCreated {
                    post_id: 1,
                    author_id: "alice".to_string(),
                    content: "ok".to_string(),
                    is_anonymous: false,
                }))
                .await
        );
    }

    #[tokio::test]
    async fn bulletin_is_posted_as_the_bot() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_complete()
            .times(1)
            .returning(|_| Ok("Sunny today, bring water.".to_string()));
        let f = fixture(generator, None).await;

        let post = f.dispatcher.publish_bulletin().await.unwrap();

        assert_eq!(post.author_id, BOT);
        assert_eq!(post.content, "Sunny today, bring water.");
    }
}
