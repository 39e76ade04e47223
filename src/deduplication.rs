// 🔍 Entity Resolver - run-scoped identity maps for one import
//
// Decides per row whether it starts a new BAN (CreateAll), attaches to a BAN
// already seen this run (ReuseClientAndBan), or is rejected (Skip).
// Order matters: earlier rows establish the identities later rows match.
// A RunContext lives for exactly one run and is never shared.

use crate::normalizer::ParsedRow;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveAction {
    /// First row of its BAN in this run. The client may still be one minted
    /// earlier for the same email (see `SyntheticIds::new_client`).
    CreateAll,

    /// BAN already seen this run: reuse its BAN and client.
    ReuseClientAndBan,

    /// Rejected before dedup. Never reaches the committer.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    EmptyBanAndPhone,
    EmptyBan,
    EmptyPhone,
    DuplicatePhone,
}

impl SkipReason {
    /// Reason shown to the operator and written to the omitted-rows export.
    pub fn message(&self) -> &'static str {
        match self {
            SkipReason::EmptyBanAndPhone => "BAN y SUSCRIBER vacíos",
            SkipReason::EmptyBan => "BAN vacío",
            SkipReason::EmptyPhone => "SUSCRIBER vacío",
            SkipReason::DuplicatePhone => "Suscriptor duplicado",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Human-readable identifiers minted for an accepted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticIds {
    pub client_id: String,
    pub ban_id: String,
    pub subscriber_id: String,

    /// The client was minted by this row.
    pub new_client: bool,

    /// The BAN was minted by this row.
    pub new_ban: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRow {
    pub action: ResolveAction,
    pub reason: Option<SkipReason>,
    pub ids: Option<SyntheticIds>,
    pub parsed: ParsedRow,
}

impl ResolvedRow {
    pub fn row(&self) -> usize {
        self.parsed.row
    }

    pub fn is_skipped(&self) -> bool {
        self.action == ResolveAction::Skip
    }

    fn skipped(parsed: ParsedRow, reason: SkipReason) -> Self {
        ResolvedRow {
            action: ResolveAction::Skip,
            reason: Some(reason),
            ids: None,
            parsed,
        }
    }
}

// ============================================================================
// RUN CONTEXT
// ============================================================================

/// Identity maps and id counters for one import run.
#[derive(Debug, Default)]
pub struct RunContext {
    /// client dedup key → CLIENT_n
    clients: HashMap<String, String>,

    /// ban_number → (BAN_n, owning CLIENT_n)
    bans: HashMap<String, (String, String)>,

    seen_phones: HashSet<String>,

    client_counter: usize,
    ban_counter: usize,
    subscriber_counter: usize,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, parsed: ParsedRow) -> ResolvedRow {
        let ban_number = parsed.ban_number().map(str::to_string);
        let phone = parsed.phone().map(str::to_string);

        // Missing keys are checked before any lookup
        let (ban_number, phone) = match (ban_number, phone) {
            (None, None) => return self.skip(parsed, SkipReason::EmptyBanAndPhone),
            (None, Some(_)) => return self.skip(parsed, SkipReason::EmptyBan),
            (Some(_), None) => return self.skip(parsed, SkipReason::EmptyPhone),
            (Some(ban), Some(phone)) => (ban, phone),
        };

        if !self.seen_phones.insert(phone) {
            return self.skip(parsed, SkipReason::DuplicatePhone);
        }

        let (action, ids) = match self.bans.get(&ban_number) {
            Some((ban_id, client_id)) => {
                let ids = SyntheticIds {
                    client_id: client_id.clone(),
                    ban_id: ban_id.clone(),
                    subscriber_id: String::new(),
                    new_client: false,
                    new_ban: false,
                };
                (ResolveAction::ReuseClientAndBan, ids)
            }
            None => {
                let key = parsed.client.dedup_key(parsed.row);
                let (client_id, new_client) = match self.clients.get(&key) {
                    Some(existing) => (existing.clone(), false),
                    None => {
                        self.client_counter += 1;
                        let minted = format!("CLIENT_{}", self.client_counter);
                        self.clients.insert(key, minted.clone());
                        (minted, true)
                    }
                };

                self.ban_counter += 1;
                let ban_id = format!("BAN_{}", self.ban_counter);
                self.bans
                    .insert(ban_number, (ban_id.clone(), client_id.clone()));

                let ids = SyntheticIds {
                    client_id,
                    ban_id,
                    subscriber_id: String::new(),
                    new_client,
                    new_ban: true,
                };
                (ResolveAction::CreateAll, ids)
            }
        };

        self.subscriber_counter += 1;
        let ids = SyntheticIds {
            subscriber_id: format!("SUB_{}", self.subscriber_counter),
            ..ids
        };

        ResolvedRow {
            action,
            reason: None,
            ids: Some(ids),
            parsed,
        }
    }

    fn skip(&self, parsed: ParsedRow, reason: SkipReason) -> ResolvedRow {
        log::debug!("Row {} skipped: {}", parsed.row, reason);
        ResolvedRow::skipped(parsed, reason)
    }

    pub fn clients_minted(&self) -> usize {
        self.client_counter
    }

    pub fn bans_minted(&self) -> usize {
        self.ban_counter
    }

    pub fn subscribers_minted(&self) -> usize {
        self.subscriber_counter
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BanDraft, ClientDraft, SubscriberDraft};

    fn row(n: usize, ban: &str, phone: &str, email: &str) -> ParsedRow {
        let opt = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };

        ParsedRow {
            row: n,
            client: ClientDraft {
                email: opt(email),
                ..Default::default()
            },
            ban: BanDraft {
                ban_number: opt(ban),
                ..Default::default()
            },
            subscriber: SubscriberDraft {
                phone: opt(phone),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_empty_keys_are_skipped() {
        let mut ctx = RunContext::new();

        let missing_ban = ctx.resolve(row(2, "", "5551234", ""));
        assert_eq!(missing_ban.action, ResolveAction::Skip);
        assert_eq!(missing_ban.reason, Some(SkipReason::EmptyBan));
        assert_eq!(missing_ban.reason.unwrap().message(), "BAN vacío");

        let missing_phone = ctx.resolve(row(3, "B1", "", ""));
        assert_eq!(missing_phone.reason, Some(SkipReason::EmptyPhone));

        let missing_both = ctx.resolve(row(4, "", "", "a@b.com"));
        assert_eq!(missing_both.reason, Some(SkipReason::EmptyBanAndPhone));
        assert_eq!(missing_both.reason.unwrap().message(), "BAN y SUSCRIBER vacíos");

        // Nothing was minted for rejected rows
        assert_eq!(ctx.clients_minted(), 0);
        assert_eq!(ctx.bans_minted(), 0);
    }

    #[test]
    fn test_rows_missing_keys_never_create() {
        let mut ctx = RunContext::new();
        let samples = [
            ("", "5550001", "x@y.com"),
            ("", "5550001", ""),
            ("B1", "", "x@y.com"),
            ("", "", ""),
        ];

        for (i, (ban, phone, email)) in samples.iter().enumerate() {
            let resolved = ctx.resolve(row(i + 2, ban, phone, email));
            assert_eq!(resolved.action, ResolveAction::Skip);
            assert!(resolved.ids.is_none());
        }
    }

    #[test]
    fn test_duplicate_phone_is_skipped_regardless_of_ban() {
        let mut ctx = RunContext::new();

        let first = ctx.resolve(row(2, "B1", "5550001", ""));
        let same_ban = ctx.resolve(row(3, "B1", "5550001", ""));
        let other_ban = ctx.resolve(row(4, "B2", "5550001", ""));

        assert_eq!(first.action, ResolveAction::CreateAll);
        assert_eq!(same_ban.reason, Some(SkipReason::DuplicatePhone));
        assert_eq!(other_ban.reason, Some(SkipReason::DuplicatePhone));
        assert_eq!(other_ban.reason.unwrap().to_string(), "Suscriptor duplicado");

        println!("✅ Only the first row per phone is accepted");
    }

    #[test]
    fn test_rejected_phone_is_not_remembered() {
        let mut ctx = RunContext::new();

        ctx.resolve(row(2, "", "5550001", ""));
        let later = ctx.resolve(row(3, "B1", "5550001", ""));

        assert_eq!(later.action, ResolveAction::CreateAll);
    }

    #[test]
    fn test_same_ban_reuses_client_and_ban() {
        let mut ctx = RunContext::new();

        let first = ctx.resolve(row(2, "B1", "5550001", ""));
        let second = ctx.resolve(row(3, "B1", "5550002", "other@x.com"));

        assert_eq!(first.action, ResolveAction::CreateAll);
        assert_eq!(second.action, ResolveAction::ReuseClientAndBan);

        let a = first.ids.unwrap();
        let b = second.ids.unwrap();
        assert_eq!(a.client_id, "CLIENT_1");
        assert_eq!(a.ban_id, "BAN_1");
        assert_eq!(a.subscriber_id, "SUB_1");
        assert_eq!(b.client_id, "CLIENT_1", "a reused BAN keeps its client");
        assert_eq!(b.ban_id, "BAN_1");
        assert_eq!(b.subscriber_id, "SUB_2");
        assert!(!b.new_client && !b.new_ban);
    }

    #[test]
    fn test_same_email_shares_client_across_bans() {
        let mut ctx = RunContext::new();

        let first = ctx.resolve(row(2, "B1", "5550001", "ops@acme.com")).ids.unwrap();
        let second = ctx.resolve(row(3, "B2", "5550002", "OPS@acme.com")).ids.unwrap();

        assert_eq!(first.client_id, second.client_id);
        assert!(first.new_client);
        assert!(!second.new_client);
        assert!(second.new_ban);
        assert_eq!(second.ban_id, "BAN_2");
    }

    #[test]
    fn test_rows_without_email_get_separate_clients() {
        let mut ctx = RunContext::new();

        let first = ctx.resolve(row(2, "B1", "5550001", "")).ids.unwrap();
        let second = ctx.resolve(row(3, "B2", "5550002", "")).ids.unwrap();

        assert_ne!(first.client_id, second.client_id);
        assert_eq!(ctx.clients_minted(), 2);
        assert_eq!(ctx.subscribers_minted(), 2);
    }

    #[test]
    fn test_fresh_context_per_run() {
        let mut first_run = RunContext::new();
        first_run.resolve(row(2, "B1", "5550001", ""));

        let mut second_run = RunContext::new();
        let again = second_run.resolve(row(2, "B1", "5550001", ""));

        assert_eq!(again.action, ResolveAction::CreateAll);
        assert_eq!(again.ids.unwrap().client_id, "CLIENT_1");
    }
}
