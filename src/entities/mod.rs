// Entity Models - the three-level hierarchy the import writes
//
// Client 1 ── * Ban 1 ── * Subscriber
//
// Each entity has:
// - a Draft: what one spreadsheet row says about it (all optional)
// - a Record: what the store holds (integer id, required fields resolved)

pub mod client;
pub mod ban;
pub mod subscriber;

pub use client::{ClientDraft, ClientRecord};
pub use ban::{BanDraft, BanRecord, BanStatus};
pub use subscriber::{contract_end_from_payments, SubscriberDraft, SubscriberRecord};
