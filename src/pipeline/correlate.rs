//! Tie an inbound subject line to a stored RFP.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::model::Rfp;

/// `RFP:` anywhere in the subject, so `Re:` / `Fwd:` prefixes are tolerated.
static RFP_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)RFP:\s*").expect("static regex is valid"));

/// The RFP title referenced by a subject line, if any.
///
/// Everything after the last `RFP:` marker, trimmed. Taking the last marker
/// copes with subjects like `Re: RFP: Re: RFP: Desks`.
pub fn rfp_reference(subject: &str) -> Option<String> {
    let marker = RFP_MARKER.find_iter(subject).last()?;
    let reference = subject[marker.end()..].trim();
    (!reference.is_empty()).then(|| reference.to_string())
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Pick the RFP a reply refers to.
///
/// An exact (case-insensitive) title match beats a substring match in either
/// direction. Within a tier, RFPs that were dispatched to `vendor_id` win,
/// then the newest.
pub fn match_rfp<'a>(reference: &str, candidates: &'a [Rfp], vendor_id: Uuid) -> Option<&'a Rfp> {
    let wanted = normalize(reference);
    if wanted.is_empty() {
        return None;
    }

    let best = |matches: Vec<&'a Rfp>| {
        matches
            .into_iter()
            .max_by_key(|rfp| (rfp.was_sent_to(vendor_id), rfp.created_at))
    };

    let exact: Vec<&Rfp> = candidates
        .iter()
        .filter(|rfp| normalize(&rfp.title) == wanted)
        .collect();
    if !exact.is_empty() {
        return best(exact);
    }

    let partial: Vec<&Rfp> = candidates
        .iter()
        .filter(|rfp| {
            let title = normalize(&rfp.title);
            !title.is_empty() && (title.contains(&wanted) || wanted.contains(&title))
        })
        .collect();
    best(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Budget, Dispatch};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn rfp(title: &str, age_days: i64) -> Rfp {
        let mut rfp = Rfp::new(
            title,
            "desc",
            Budget {
                amount: dec!(1000),
                currency: "USD".into(),
            },
        );
        rfp.created_at = Utc::now() - Duration::days(age_days);
        rfp
    }

    #[test]
    fn reference_from_plain_and_reply_subjects() {
        assert_eq!(rfp_reference("RFP: Office Laptops").as_deref(), Some("Office Laptops"));
        assert_eq!(
            rfp_reference("Re: RFP: Office Laptops").as_deref(),
            Some("Office Laptops")
        );
        assert_eq!(rfp_reference("FW: re: rfp:office chairs ").as_deref(), Some("office chairs"));
        assert_eq!(
            rfp_reference("Re: RFP: Re: RFP: Desks").as_deref(),
            Some("Desks")
        );
    }

    #[test]
    fn no_reference_without_marker_or_title() {
        assert_eq!(rfp_reference("Quote for laptops"), None);
        assert_eq!(rfp_reference("RFP:   "), None);
        assert_eq!(rfp_reference(""), None);
    }

    #[test]
    fn exact_match_beats_substring() {
        let rfps = vec![rfp("Office Laptops and Docks", 0), rfp("Office Laptops", 10)];
        let hit = match_rfp("office  laptops", &rfps, Uuid::new_v4()).unwrap();
        assert_eq!(hit.title, "Office Laptops");
    }

    #[test]
    fn substring_matches_either_way() {
        let rfps = vec![rfp("Office Laptops", 0)];
        let vendor = Uuid::new_v4();
        assert!(match_rfp("Laptops", &rfps, vendor).is_some());
        assert!(match_rfp("Office Laptops - revised quote", &rfps, vendor).is_some());
        assert!(match_rfp("Forklifts", &rfps, vendor).is_none());
    }

    #[test]
    fn dispatched_rfp_preferred_then_newest() {
        let vendor = Uuid::new_v4();
        let mut sent = rfp("Office Laptops", 30);
        sent.sent_to_vendors.push(Dispatch {
            vendor_id: vendor,
            sent_at: Utc::now(),
        });
        let newer = rfp("Office Laptops", 1);
        let newest = rfp("Office Laptops", 0);
        let rfps = vec![newer, sent.clone(), newest.clone()];

        assert_eq!(match_rfp("Office Laptops", &rfps, vendor).unwrap().id, sent.id);
        assert_eq!(
            match_rfp("Office Laptops", &rfps, Uuid::new_v4()).unwrap().id,
            newest.id
        );
    }
}
