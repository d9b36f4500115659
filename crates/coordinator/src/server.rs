use crate::traits::LocalStore;
use crate::CoordinatorError;
use bytes::Bytes;
use ring::Endpoint;
use wire::{Message, Mutation, ReadCommand, Verb};

/// Replica-side handling of the per-key verbs: apply mutations (acked),
/// apply read repairs (unacked), and serve reads. Other verbs belong to the
/// topology and streaming surfaces.
pub async fn handle_message(
    store: &dyn LocalStore,
    local: Endpoint,
    message: Message,
) -> Result<Option<Message>, CoordinatorError> {
    match message.verb {
        Verb::Mutation => {
            let mutation = Mutation::decode(message.body)?;
            store.apply(&mutation).await?;
            Ok(Some(Message::new(Verb::Mutation, local, Bytes::new())))
        }
        Verb::ReadRepair => {
            let mutation = Mutation::decode(message.body)?;
            store.apply(&mutation).await?;
            Ok(None)
        }
        Verb::Read => {
            let command = ReadCommand::decode(message.body)?;
            let response = store.read(&command).await?;
            Ok(Some(Message::new(
                Verb::ReadResponse,
                local,
                response.encode(),
            )))
        }
        other => Err(CoordinatorError::Configuration(format!(
            "verb {other:?} is not served here"
        ))),
    }
}
