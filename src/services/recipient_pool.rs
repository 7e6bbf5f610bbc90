use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ServiceError;
use crate::models::campaign::Campaign;
use crate::models::plan::EmailListStats;
use crate::services::message_store::MessageStore;
use crate::services::object_store::ObjectStore;

/// Eligible recipients for one campaign day, with the stats captured into
/// the stored plan.
#[derive(Debug)]
pub struct EligibleRecipients {
    pub emails: Vec<String>,
    pub stats: EmailListStats,
    /// Set when warm-up exhaustion wiped this campaign's send history.
    pub cycle_reset: bool,
}

/// Produces the eligible recipient list: CSV list from object storage minus
/// the already-sent set minus the unsubscribe set. The warm-up flag flips the
/// sent-set scope between campaign-local and global suppression.
#[derive(Clone)]
pub struct RecipientPool {
    store: Arc<dyn ObjectStore>,
    messages: MessageStore,
    global_list_key: String,
    unsubscribe_list_key: String,
}

impl RecipientPool {
    pub fn new(store: Arc<dyn ObjectStore>, messages: MessageStore, config: &Config) -> Self {
        Self {
            store,
            messages,
            global_list_key: config.global_list_key.clone(),
            unsubscribe_list_key: config.unsubscribe_list_key.clone(),
        }
    }

    pub async fn eligible_for(&self, campaign: &Campaign) -> Result<EligibleRecipients, ServiceError> {
        let list_key = match campaign.email_list_source.as_str() {
            "custom" => campaign
                .custom_email_list_key
                .clone()
                .ok_or_else(|| ServiceError::Validation("campaign has no custom list key".into()))?,
            _ => self.global_list_key.clone(),
        };

        let csv = self
            .store
            .get(&list_key)
            .await?
            .ok_or(ServiceError::NotFound("email list"))?;
        let all = parse_recipient_csv(&String::from_utf8_lossy(&csv))?;

        let unsubscribed = self.load_unsubscribe_set().await?;

        let sent = if campaign.warmup_enabled {
            self.messages.sent_recipients_for_campaign(campaign.id).await?
        } else {
            self.messages.sent_recipients_global().await?
        };

        let eligible: Vec<String> = all
            .iter()
            .filter(|e| !sent.contains(*e) && !unsubscribed.contains(*e))
            .cloned()
            .collect();

        let mut stats = EmailListStats {
            total_in_list: all.len() as i64,
            suppressed_sent: all.iter().filter(|e| sent.contains(*e)).count() as i64,
            suppressed_unsubscribed: all.iter().filter(|e| unsubscribed.contains(*e)).count() as i64,
            eligible: eligible.len() as i64,
        };

        // Warm-up exhaustion: the pool is deliberately reused, so once every
        // recipient has been cycled we wipe this campaign's history and start
        // the next cycle from the top of the list.
        if campaign.warmup_enabled && eligible.is_empty() && !all.is_empty() {
            let removed = self.messages.delete_for_campaign(campaign.id).await?;
            tracing::info!(
                campaign_id = %campaign.id,
                removed,
                "warm-up pool exhausted, starting new cycle"
            );
            let eligible: Vec<String> =
                all.iter().filter(|e| !unsubscribed.contains(*e)).cloned().collect();
            stats.suppressed_sent = 0;
            stats.eligible = eligible.len() as i64;
            return Ok(EligibleRecipients { emails: eligible, stats, cycle_reset: true });
        }

        Ok(EligibleRecipients { emails: eligible, stats, cycle_reset: false })
    }

    async fn load_unsubscribe_set(&self) -> Result<HashSet<String>, ServiceError> {
        match self.store.get(&self.unsubscribe_list_key).await? {
            Some(bytes) => Ok(parse_unsubscribe_list(&String::from_utf8_lossy(&bytes))),
            // A missing unsubscribe file is an empty set, not an error.
            None => Ok(HashSet::new()),
        }
    }
}

/// Extracts and normalizes the email column from a recipient CSV. The header
/// row is matched case-insensitively; unknown columns are ignored; values are
/// trimmed, lowercased and deduplicated preserving first-seen order.
pub fn parse_recipient_csv(text: &str) -> Result<Vec<String>, ServiceError> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| ServiceError::Validation("empty email list".into()))?;

    let email_index = header
        .split(',')
        .position(|col| col.trim().trim_matches('"').eq_ignore_ascii_case("email"))
        .ok_or_else(|| ServiceError::Validation("email column not found in list".into()))?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in lines {
        let value = match line.split(',').nth(email_index) {
            Some(v) => v.trim().trim_matches('"').to_lowercase(),
            None => continue,
        };
        if value.is_empty() || !value.contains('@') {
            continue;
        }
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    Ok(out)
}

/// Parses the newline `email,timestamp` unsubscribe file. Timestamps outside
/// `[0, 9999999999]` fall back to the current time; only the address matters
/// for suppression.
pub fn parse_unsubscribe_list(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    for line in text.lines() {
        let mut parts = line.splitn(2, ',');
        let email = match parts.next() {
            Some(e) => e.trim().to_lowercase(),
            None => continue,
        };
        if email.is_empty() || !email.contains('@') {
            continue;
        }
        let _timestamp = parts
            .next()
            .and_then(|t| t.trim().parse::<i64>().ok())
            .filter(|t| (0..=9_999_999_999).contains(t))
            .unwrap_or_else(|| Utc::now().timestamp());
        set.insert(email);
    }
    set
}

/// Warm-up windowing: slice `[index, index + quota)` off the eligible list,
/// wrapping back to 0 past the end. Returns the window and the next index.
pub fn warmup_window(emails: &[String], index: usize, quota: usize) -> (Vec<String>, usize) {
    if emails.is_empty() || quota == 0 {
        return (Vec::new(), 0);
    }
    let start = index % emails.len();
    let end = (start + quota).min(emails.len());
    let window: Vec<String> = emails[start..end].to_vec();
    let next = if end >= emails.len() { 0 } else { end };
    (window, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_case_insensitive_header() {
        for header in ["email", "Email", "EMAIL"] {
            let csv = format!("{},name\nUser@Example.com ,alice\nother@test.io,bob\n", header);
            let emails = parse_recipient_csv(&csv).unwrap();
            assert_eq!(emails, vec!["user@example.com", "other@test.io"]);
        }
    }

    #[test]
    fn test_parse_csv_with_username_column() {
        let csv = "Username,Email\nalice,ALICE@corp.com\nbob,bob@corp.com\nalice2,alice@corp.com\n";
        let emails = parse_recipient_csv(csv).unwrap();
        // Deduplicated, lowercased, first-seen order.
        assert_eq!(emails, vec!["alice@corp.com", "bob@corp.com"]);
    }

    #[test]
    fn test_parse_csv_without_email_column() {
        assert!(parse_recipient_csv("name,phone\nalice,123\n").is_err());
    }

    #[test]
    fn test_parse_csv_skips_malformed_rows() {
        let csv = "email\nnot-an-address\n\nreal@example.com\n";
        assert_eq!(parse_recipient_csv(csv).unwrap(), vec!["real@example.com"]);
    }

    #[test]
    fn test_parse_unsubscribe_list() {
        let text = "User@A.com,1700000000\nb@b.com,99999999999\nc@c.com\nnot-an-email,5\n";
        let set = parse_unsubscribe_list(text);
        assert!(set.contains("user@a.com"));
        // Out-of-range timestamp still suppresses the address.
        assert!(set.contains("b@b.com"));
        assert!(set.contains("c@c.com"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_warmup_window_advances_and_wraps() {
        let emails: Vec<String> = (0..5).map(|i| format!("u{}@x.com", i)).collect();

        let (window, next) = warmup_window(&emails, 0, 2);
        assert_eq!(window, vec!["u0@x.com", "u1@x.com"]);
        assert_eq!(next, 2);

        let (window, next) = warmup_window(&emails, 2, 2);
        assert_eq!(window, vec!["u2@x.com", "u3@x.com"]);
        assert_eq!(next, 4);

        // Past the end: truncated window, index wraps to 0.
        let (window, next) = warmup_window(&emails, 4, 2);
        assert_eq!(window, vec!["u4@x.com"]);
        assert_eq!(next, 0);
    }

    #[test]
    fn test_warmup_window_empty_list() {
        let (window, next) = warmup_window(&[], 3, 10);
        assert!(window.is_empty());
        assert_eq!(next, 0);
    }
}
