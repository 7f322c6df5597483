//! Parser for the canonical submission record. The Chinese field labels are
//! a wire-level contract with the conversation form: whatever the form
//! emits, this parser must read back unchanged.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSubmission {
    pub apply_time: Option<String>,
    pub project: Option<String>,
    pub environment: Option<String>,
    pub services: Vec<String>,
    pub hashes: Vec<String>,
    pub branch: Option<String>,
    pub content: Option<String>,
    pub addresses: Vec<String>,
}

// Tolerates both half- and full-width colons after the label.
#[allow(clippy::unwrap_used)]
fn field_re(label: &str) -> Regex {
    Regex::new(&format!(r"{label}[：:][ \t]*([^\n]+)")).unwrap()
}

macro_rules! cached_re {
    ($name:ident, $label:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| field_re($label))
        }
    };
}

cached_re!(re_apply_time, "申请时间");
cached_re!(re_project, "申请项目");
cached_re!(re_environment, "申请环境");
cached_re!(re_services, "申请部署服务");
cached_re!(re_hash, "申请发版hash");
cached_re!(re_branch, "申请发版分支");
cached_re!(re_content, "申请发版服务内容");

fn capture(re: &Regex, data: &str) -> Option<String> {
    re.captures(data)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Normalise full-width comma and the enumeration comma to ','.
fn normalise_separators(s: &str) -> String {
    s.replace('，', ",").replace('、', ",")
}

fn split_list(s: &str) -> Vec<String> {
    normalise_separators(s)
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hashes additionally split on newlines.
fn split_hashes(s: &str) -> Vec<String> {
    normalise_separators(s)
        .split(|c| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Addresses follow their label one per line, ending at the next labelled
/// field or the end of the record.
#[allow(clippy::unwrap_used)]
fn parse_addresses(data: &str) -> Vec<String> {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    let label = LABEL.get_or_init(|| Regex::new(r"申请新增地址[：:][ \t]*").unwrap());
    let Some(m) = label.find(data) else {
        return Vec::new();
    };
    let rest = &data[m.end()..];
    let mut addresses = Vec::new();
    for line in rest.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // A new labelled field terminates the address block.
        if line.starts_with("申请") && (line.contains(':') || line.contains('：')) {
            break;
        }
        addresses.push(line.to_string());
    }
    addresses
}

pub fn parse_submission(data: &str) -> ParsedSubmission {
    ParsedSubmission {
        apply_time: capture(re_apply_time(), data),
        project: capture(re_project(), data),
        environment: capture(re_environment(), data),
        services: capture(re_services(), data)
            .map(|s| split_list(&s))
            .unwrap_or_default(),
        hashes: capture(re_hash(), data)
            .map(|s| split_hashes(&s))
            .unwrap_or_default(),
        branch: capture(re_branch(), data),
        content: capture(re_content(), data),
        addresses: parse_addresses(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "申请时间: 2026-08-01 10:00:00\n\
                          申请项目: EBPAY\n\
                          申请环境: UAT\n\
                          申请发版分支: main\n\
                          申请部署服务: svc-a, svc-b\n\
                          申请发版hash: aaa,bbb\n\
                          申请发版服务内容: bugfix";

    #[test]
    fn parses_all_fields() {
        let p = parse_submission(SAMPLE);
        assert_eq!(p.apply_time.as_deref(), Some("2026-08-01 10:00:00"));
        assert_eq!(p.project.as_deref(), Some("EBPAY"));
        assert_eq!(p.environment.as_deref(), Some("UAT"));
        assert_eq!(p.branch.as_deref(), Some("main"));
        assert_eq!(p.services, vec!["svc-a", "svc-b"]);
        assert_eq!(p.hashes, vec!["aaa", "bbb"]);
        assert_eq!(p.content.as_deref(), Some("bugfix"));
        assert!(p.addresses.is_empty());
    }

    #[test]
    fn accepts_fullwidth_separators() {
        let data = "申请项目：EBPAY\n申请部署服务：svc-a，svc-b、svc-c\n申请发版hash：x、y，z";
        let p = parse_submission(data);
        assert_eq!(p.project.as_deref(), Some("EBPAY"));
        assert_eq!(p.services, vec!["svc-a", "svc-b", "svc-c"]);
        assert_eq!(p.hashes, vec!["x", "y", "z"]);
    }

    #[test]
    fn address_block_runs_to_end_of_record() {
        let data = "申请时间: t\n申请项目: LINKS\n申请环境: TRC\n申请新增地址:\naddr1\naddr2\n";
        let p = parse_submission(data);
        assert_eq!(p.addresses, vec!["addr1", "addr2"]);
        assert!(p.services.is_empty());
        assert!(p.hashes.is_empty());
    }

    #[test]
    fn address_block_stops_at_next_labelled_field() {
        let data = "申请新增地址:\naddr1\naddr2\n申请发版服务内容: note";
        let p = parse_submission(data);
        assert_eq!(p.addresses, vec!["addr1", "addr2"]);
        assert_eq!(p.content.as_deref(), Some("note"));
    }

    #[test]
    fn missing_fields_yield_empty() {
        let p = parse_submission("nothing to see here");
        assert_eq!(p, ParsedSubmission::default());
    }
}
