//! Bounded history retrieval.
//!
//! Storage is queried newest-first so the read stays bounded; callers get
//! the window back oldest-first.

use crate::model::{ChatId, Message};
use crate::storage::{StorageError, StorageProvider};

/// Last `size` messages of a chat in chronological order.
///
/// Computed fresh on every call.
///
/// # Errors
///
/// Propagates storage read failures.
pub async fn recent_messages(
    storage: &dyn StorageProvider,
    chat_id: &ChatId,
    size: usize,
) -> Result<Vec<Message>, StorageError> {
    let mut window = storage.list_chat_messages(chat_id, size).await?;
    window.reverse();
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::storage::{MemoryStorage, MockStorageProvider};
    use chrono::Utc;
    use mockall::predicate::{always, eq};
    use proptest::prelude::*;

    fn message(chat: &ChatId, id: i32) -> Message {
        Message {
            id,
            chat_id: chat.clone(),
            reply_to_id: None,
            user_id: 1,
            username: "u".into(),
            role: if id % 2 == 0 { Role::Assistant } else { Role::User },
            text: id.to_string(),
            additional: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_window_requests_limit_and_reverses() {
        let chat = ChatId::generate();
        let stored = chat.clone();
        let mut storage = MockStorageProvider::new();
        storage
            .expect_list_chat_messages()
            .with(always(), eq(3))
            .times(1)
            .returning(move |_, _| Ok(vec![message(&stored, 9), message(&stored, 8), message(&stored, 7)]));

        let ids: Vec<i32> = recent_messages(&storage, &chat, 3)
            .await
            .expect("window")
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    proptest! {
        #[test]
        fn window_is_chronological_suffix(k in 0usize..40, n in 0usize..50) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            let ids = rt.block_on(async {
                let storage = MemoryStorage::new();
                let chat = ChatId::generate();
                for id in 1..=k {
                    let id = i32::try_from(id).expect("small id");
                    storage.insert_message(&message(&chat, id)).await.expect("insert");
                }
                recent_messages(&storage, &chat, n)
                    .await
                    .expect("window")
                    .into_iter()
                    .map(|m| m.id)
                    .collect::<Vec<_>>()
            });
            let start = k.saturating_sub(n) + 1;
            let expected: Vec<i32> = (start..=k)
                .map(|id| i32::try_from(id).expect("small id"))
                .collect();
            prop_assert_eq!(ids, expected);
        }
    }
}
