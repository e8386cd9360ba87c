//! Builders for Tendermint event subscription queries.
//!
//! ```
//! use dexrpc_core::query;
//!
//! assert_eq!(query::event(query::NEW_BLOCK), "tm.event = 'NewBlock'");
//! assert_eq!(
//!     query::and([query::event(query::TX), query::tag("tx.height", "5")]),
//!     "tm.event = 'Tx' AND tx.height = '5'"
//! );
//! ```

pub const NEW_BLOCK: &str = "NewBlock";
pub const NEW_BLOCK_HEADER: &str = "NewBlockHeader";
pub const TX: &str = "Tx";
pub const VALIDATOR_SET_UPDATES: &str = "ValidatorSetUpdates";

/// `tm.event = '<kind>'`
pub fn event(kind: &str) -> String {
    tag("tm.event", kind)
}

/// `<key> = '<value>'`, with single quotes in `value` escaped.
pub fn tag(key: &str, value: &str) -> String {
    format!("{key} = '{}'", value.replace('\'', "\\'"))
}

/// Join conditions with `AND`.
pub fn and<I, S>(conditions: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    conditions
        .into_iter()
        .map(|c| c.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" AND ")
}
