//! Service layer
//!
//! Contains the write paths and read models of the engine.
//! Services run each mutation in one store transaction and publish the
//! resulting domain event only after it commits.

mod account;
mod comment;
mod friendship;
mod hydration;
mod message;
mod moderation;
mod notification;
mod post;

pub use account::AccountService;
pub use comment::{CommentDraft, CommentService};
pub use friendship::FriendshipService;
pub use hydration::{
    AuthorView, CommentView, ConversationView, FriendRequestView, Hydrator, NotificationView,
    PostView, UserSummary,
};
pub use message::MessageService;
pub use moderation::ModerationService;
pub use notification::NotificationService;
pub use post::PostService;
