//! Fund header fields found in report narrative ("Fund Name: ...", "GP: ...").

use crate::models::FundProfile;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FUND_NAME: Regex = Regex::new(r"(?im)^\s*fund\s+name\s*:\s*(.+?)\s*$").unwrap();
    static ref GP_NAME: Regex =
        Regex::new(r"(?im)^\s*(?:gp|general\s+partner)\s*:\s*(.+?)\s*$").unwrap();
    static ref FUND_TYPE: Regex = Regex::new(r"(?im)^\s*fund\s+type\s*:\s*(.+?)\s*$").unwrap();
    static ref VINTAGE: Regex = Regex::new(r"(?i)vintage\s+year\s*:\s*(\d{4})").unwrap();
}

pub fn parse_fund_profile(text: &str) -> FundProfile {
    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };

    FundProfile {
        name: capture(&FUND_NAME),
        gp_name: capture(&GP_NAME),
        fund_type: capture(&FUND_TYPE),
        vintage_year: capture(&VINTAGE).and_then(|y| y.parse().ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile() {
        let text = "Quarterly Report\nFund Name: Tech Ventures Fund III\nGP: Tech Ventures Partners\nVintage Year: 2022\n";
        let profile = parse_fund_profile(text);
        assert_eq!(profile.name.as_deref(), Some("Tech Ventures Fund III"));
        assert_eq!(profile.gp_name.as_deref(), Some("Tech Ventures Partners"));
        assert_eq!(profile.vintage_year, Some(2022));
        assert_eq!(profile.fund_type, None);
    }

    #[test]
    fn test_missing_fields_are_none() {
        let profile = parse_fund_profile("Performance Summary only");
        assert!(profile.is_empty());
    }
}
