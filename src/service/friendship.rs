//! Friendship service
//!
//! One request row per unordered user pair drives the whole relationship:
//!
//! ```text
//! (none) --send--> PENDING --accept--> ACCEPTED --delete--> (none)
//!                     |
//!                     +--reject--> REJECTED --send--> PENDING
//! ```

use chrono::Utc;
use std::sync::Arc;

use super::hydration::{FriendRequestView, Hydrator, UserSummary};
use crate::data::{Database, FriendRequest, RequestOutcome};
use crate::error::AppError;

/// Friendship service
pub struct FriendshipService {
    db: Arc<Database>,
    hydrator: Arc<Hydrator>,
}

impl FriendshipService {
    /// Create new friendship service
    pub fn new(db: Arc<Database>, hydrator: Arc<Hydrator>) -> Self {
        Self { db, hydrator }
    }

    /// Ask `addressee_id` to become friends.
    ///
    /// A rejected pair may be asked again by either side; the new sender
    /// becomes the requester.
    ///
    /// # Errors
    /// - `Validation` when asking oneself
    /// - `NotFound` if the addressee is unknown
    /// - `Conflict` if a request is pending or the pair are already friends
    pub async fn send_request(
        &self,
        requester_id: &str,
        addressee_id: &str,
    ) -> Result<FriendRequest, AppError> {
        if requester_id == addressee_id {
            return Err(AppError::Validation(
                "cannot send a friend request to yourself".to_string(),
            ));
        }
        if self.db.get_user(addressee_id).await?.is_none() {
            return Err(AppError::NotFound("user"));
        }

        match self
            .db
            .open_friend_request(requester_id, addressee_id, Utc::now())
            .await?
        {
            RequestOutcome::Created(request) => {
                tracing::info!(
                    request_id = request.id,
                    requester_id,
                    addressee_id,
                    "Friend request sent"
                );
                Ok(request)
            }
            RequestOutcome::Reactivated(request) => {
                tracing::info!(
                    request_id = request.id,
                    requester_id,
                    addressee_id,
                    "Rejected friend request reopened"
                );
                Ok(request)
            }
            RequestOutcome::AlreadyPending => {
                Err(AppError::Conflict("already pending".to_string()))
            }
            RequestOutcome::AlreadyFriends => {
                Err(AppError::Conflict("already friends".to_string()))
            }
        }
    }

    /// Accept or reject a pending request as its addressee.
    pub async fn respond(
        &self,
        request_id: i64,
        acting_uid: &str,
        accept: bool,
    ) -> Result<FriendRequest, AppError> {
        let request = self
            .db
            .respond_friend_request(request_id, acting_uid, accept, Utc::now())
            .await?;

        tracing::info!(request_id, acting_uid, accept, "Friend request answered");
        Ok(request)
    }

    /// End a friendship.
    ///
    /// # Errors
    /// `NotFound` if the pair are not friends
    pub async fn delete_friendship(&self, user_id: &str, friend_id: &str) -> Result<(), AppError> {
        if !self.db.delete_friendship(user_id, friend_id).await? {
            return Err(AppError::NotFound("friendship"));
        }

        tracing::info!(user_id, friend_id, "Friendship removed");
        Ok(())
    }

    pub async fn are_friends(&self, a: &str, b: &str) -> Result<bool, AppError> {
        self.db.are_friends(a, b).await
    }

    /// Friends of a user with their profiles
    pub async fn list_friends(&self, user_id: &str) -> Result<Vec<UserSummary>, AppError> {
        let ids = self.db.list_friend_ids(user_id).await?;
        self.hydrator.users(&ids).await
    }

    /// Requests waiting for the user's answer, newest first
    pub async fn pending_requests(
        &self,
        user_id: &str,
    ) -> Result<Vec<FriendRequestView>, AppError> {
        let rows = self.db.list_pending_requests(user_id).await?;
        self.hydrator.friend_requests(rows).await
    }
}
