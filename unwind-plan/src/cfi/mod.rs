//! Call frame information decoding and execution.
//!
//! Record framing and instruction decoding come from gimli; the rule
//! bookkeeping is local so that instructions the table format cannot
//! express degrade into unsupported rules instead of failing the image.

mod decode;
mod execute;
mod rules;

pub use decode::{decode, decode_image_section, CfiRecord, SectionAddresses};
pub use rules::{CfaRule, Rule, RuleSet};
