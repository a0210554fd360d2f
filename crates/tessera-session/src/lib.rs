//! # tessera-session: Session tokens for `Tessera`
//!
//! Session consistency promises a client that it reads its own writes and
//! never reads backwards. The backend returns, with every response, a token
//! describing how far the serving replica had progressed; the client keeps
//! the maximum it has seen per partition range and sends it back so that a
//! replica behind that point refuses the read (404/1002) instead of serving
//! stale data.
//!
//! This crate provides:
//! - [`SessionToken`]: simple and vector token values with a monotonic merge
//! - [`SessionTokenHeader`]: the `"<rangeId>:<token>,..."` header codec
//! - [`SessionTokenStore`]: the per-client store keyed by collection identity,
//!   with the response capture rules
//!
//! # Example
//!
//! ```
//! use tessera_session::{SessionToken, SessionTokenStore};
//! use tessera_types::{CollectionIdentity, RangeId};
//!
//! let store = SessionTokenStore::new();
//! let id = CollectionIdentity::new(1);
//! let range = RangeId::new("0");
//!
//! store.merge(id, &range, &"1#100#1=90".parse().unwrap());
//! store.merge(id, &range, &"1#80#1=95".parse().unwrap());
//!
//! assert_eq!(store.resolve(id, &range).unwrap().to_string(), "1#100#1=95");
//! ```

mod error;
mod header;
mod store;
mod token;

pub use error::{Result, SessionTokenError};
pub use header::SessionTokenHeader;
pub use store::{Capture, CaptureRule, SessionTokenStore};
pub use token::{SessionToken, VectorToken};
