//! Private-use CSI RPC channel: message model, parameter validation,
//! and the thread-safe command router.

mod message;
mod router;
mod validator;

pub use message::{
    MalformedKind, RpcCommandType, RpcMessage, RpcResult, RPC_PROTOCOL_VERSION,
    TIMEOUT_COMMAND_ID,
};
pub use router::{MalformedHook, RpcCommandHandler, RpcOutcome, RpcRouter};
pub use validator::{
    ParameterValidator, RpcValidationErrorType, StringPattern, ValidationFailure, ValidationRule,
};
