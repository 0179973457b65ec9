//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use dispatch_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const SYSTEM_ERROR: i32 = 5002;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::Conflict(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        AppError::Database(msg) => ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>),
        AppError::Internal(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::Domain(e) => ErrorObjectOwned::owned(code::CONFLICT, e.to_string(), None::<()>),
        AppError::Io(e) => ErrorObjectOwned::owned(code::SYSTEM_ERROR, e.to_string(), None::<()>),
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::DB_ERROR, e.to_string(), None::<()>)
        }
        AppError::Config(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::InvalidState(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(to_rpc_error(AppError::Validation("x".into())).code(), 4000);
        assert_eq!(to_rpc_error(AppError::NotFound("x".into())).code(), 4001);
        assert_eq!(to_rpc_error(AppError::Conflict("x".into())).code(), 4002);
        assert_eq!(to_rpc_error(AppError::Database("x".into())).code(), 5001);
        assert_eq!(to_rpc_error(AppError::Internal("x".into())).code(), 5000);
    }
}
