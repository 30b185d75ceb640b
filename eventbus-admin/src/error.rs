use eventbus_core::dead_letters::InsertionId;
use eventbus_core::error::EventBusError;
use eventbus_core::registration::Group;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AdminError {
    #[error("event bus: {0}")]
    EventBus(#[from] EventBusError),

    #[error("dead letter not found: group={group}, insertion_id={insertion_id}")]
    DeadLetterNotFound {
        group: Group,
        insertion_id: InsertionId,
    },

    #[error("handler not found: {0}")]
    HandlerNotFound(&'static str),

    #[error("handler already registered: command={command}")]
    AlreadyRegisteredCommand { command: &'static str },

    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

pub type AdminResult<T> = Result<T, AdminError>;
