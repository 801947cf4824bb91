//! Task interest/acceptance workflow.
//!
//! Transitions are pure functions over a [`Task`] value. The repository applies them inside a
//! versioned read-modify-write loop, so every check here sees the state it is written against.

mod inflight;

pub use inflight::InFlightGate;

use crate::errors::AppError;
use crate::models::{Task, TaskStatus};

/// Status implied by the accepted set and capacity.
pub fn derive_status(accepted: usize, max_accepted: i64) -> TaskStatus {
    if accepted as i64 >= max_accepted {
        TaskStatus::Assigned
    } else {
        TaskStatus::Available
    }
}

/// Add `user_id` to the interested set. Returns false when already present.
pub fn mark_interest(task: &mut Task, user_id: &str) -> bool {
    insert_unique(&mut task.interested_user_ids, user_id)
}

/// Remove `user_id` from the interested set. Returns false when absent.
pub fn reject_interest(task: &mut Task, user_id: &str) -> bool {
    remove_all(&mut task.interested_user_ids, user_id)
}

/// Accept `user_id` and recompute the status.
///
/// Accepting someone already accepted is a no-op success. Only users in the interested set can
/// be newly accepted. Accepting a new user when the accepted set is full fails with
/// [`AppError::CapacityReached`]. Either failure leaves `task` untouched.
pub fn assign(task: &mut Task, user_id: &str) -> Result<bool, AppError> {
    let already = task.accepted_user_ids.iter().any(|id| id == user_id);
    if !already && !task.interested_user_ids.iter().any(|id| id == user_id) {
        return Err(AppError::Validation(format!(
            "User {} has not expressed interest in this task",
            user_id
        )));
    }
    if !already && task.accepted_user_ids.len() as i64 >= task.max_accepted {
        return Err(AppError::CapacityReached {
            capacity: task.max_accepted,
        });
    }

    let added = insert_unique(&mut task.accepted_user_ids, user_id);
    task.status = derive_status(task.accepted_user_ids.len(), task.max_accepted);
    Ok(added)
}

/// Flip `user_id`'s membership in the like set. Returns whether the user now likes the task.
pub fn toggle_like(task: &mut Task, user_id: &str) -> bool {
    if remove_all(&mut task.like_user_ids, user_id) {
        false
    } else {
        task.like_user_ids.push(user_id.to_string());
        true
    }
}

fn insert_unique(set: &mut Vec<String>, user_id: &str) -> bool {
    if set.iter().any(|id| id == user_id) {
        return false;
    }
    set.push(user_id.to_string());
    true
}

fn remove_all(set: &mut Vec<String>, user_id: &str) -> bool {
    let before = set.len();
    set.retain(|id| id != user_id);
    set.len() != before
}
