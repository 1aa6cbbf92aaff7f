pub mod cipher;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod primitives;
pub mod rate_limit;
pub mod signature;
pub mod token_cache;
pub mod wecom;
pub mod xml;

pub use cipher::{decode_encoding_aes_key, CallbackCipher};
pub use controller::{CallbackController, CallbackResponse, SenderNameResolver};
pub use error::{CallbackError, CallbackErrorKind, NotifyError};
pub use primitives::{CryptoPrimitives, RustCryptoPrimitives};
pub use signature::{compute_signature, verify_signature};
pub use wecom::{Member, NewsArticle, NotificationGateway, NotifyMessage, SendReceipt};
