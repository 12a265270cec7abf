//! Codec module - typed encode/decode for rewritten frames.
//!
//! Provides:
//! - CQL notation primitives (`[string]`, `[value]`, multimaps, …)
//! - Typed bodies for QUERY, BATCH, SUPPORTED and ERROR

mod message;
mod primitives;

pub use message::{body_prefix_len, Batch, BatchStatement, ErrorBody, Query, Supported};
pub use primitives::{
    read_int, read_long_string, read_short, read_string, read_string_list, read_string_multimap,
    write_long_string, write_string, write_string_list, write_string_multimap, Value,
};
