//! Control command grammar.
//!
//! Three commands, one per line:
//!
//! ```text
//! a <url> [-j N] [-r POLICY] [-k] [-b NAME=VALUE]...
//! s <job-id>
//! r <job-id>
//! ```
//!
//! Parsing is all-or-nothing: every flag is validated here, before any job
//! record exists, so a rejected command leaves no trace. Values containing
//! spaces can be quoted with `'` or `"`.

use crate::error::ControlError;
use crate::job::{ArchiveRequest, Cookie, JobId};
use crate::policy::{canonicalize, RecursionPolicy};

/// A fully validated control-channel request.
#[derive(Debug, Clone)]
pub enum ControlRequest {
    Archive(ArchiveRequest),
    Status(JobId),
    Revoke(JobId),
}

/// Parse one command line issued by `owner`.
pub fn parse(line: &str, owner: &str) -> Result<ControlRequest, ControlError> {
    let tokens = tokenize(line)?;
    let Some((verb, args)) = tokens.split_first() else {
        return Err(ControlError::Malformed("empty command".to_string()));
    };
    match verb.as_str() {
        "a" => parse_archive(args, owner),
        "s" => Ok(ControlRequest::Status(single_id(args)?)),
        "r" => Ok(ControlRequest::Revoke(single_id(args)?)),
        other => Err(ControlError::Malformed(format!(
            "unknown command {other:?}"
        ))),
    }
}

fn single_id(args: &[String]) -> Result<JobId, ControlError> {
    match args {
        [id] => Ok(JobId::from(id.as_str())),
        _ => Err(ControlError::Malformed(
            "expected exactly one job id".to_string(),
        )),
    }
}

fn parse_archive(args: &[String], owner: &str) -> Result<ControlRequest, ControlError> {
    let Some((raw_url, flags)) = args.split_first() else {
        return Err(ControlError::Malformed("archive needs a url".to_string()));
    };
    let url = canonicalize(raw_url)
        .map_err(|_| ControlError::Malformed(format!("invalid url {raw_url:?}")))?;

    let mut concurrency = None;
    let mut policy = None;
    let mut insecure = false;
    let mut cookies = Vec::new();

    let mut rest = flags;
    while let Some((flag, tail)) = rest.split_first() {
        rest = tail;
        match flag.as_str() {
            "-j" | "--concurrency" => {
                let value = take_value(&mut rest, flag)?;
                let n: usize = value
                    .parse()
                    .map_err(|_| ControlError::Malformed(format!("bad concurrency {value:?}")))?;
                if n == 0 {
                    return Err(ControlError::Malformed(
                        "concurrency must be at least 1".to_string(),
                    ));
                }
                concurrency = Some(n);
            }
            "-r" | "--recursive" => {
                let value = take_value(&mut rest, flag)?;
                policy = Some(RecursionPolicy::parse(&value, &url)?);
            }
            "-k" | "--insecure" => insecure = true,
            "-b" | "--cookie" => {
                let value = take_value(&mut rest, flag)?;
                cookies.push(value.parse::<Cookie>()?);
            }
            other => {
                return Err(ControlError::Malformed(format!("unknown flag {other:?}")));
            }
        }
    }

    Ok(ControlRequest::Archive(ArchiveRequest {
        url,
        owner: owner.to_string(),
        concurrency,
        policy: policy.unwrap_or(RecursionPolicy::DepthLimit(0)),
        insecure,
        cookies,
        output: None,
    }))
}

fn take_value(rest: &mut &[String], flag: &str) -> Result<String, ControlError> {
    let Some((value, tail)) = rest.split_first() else {
        return Err(ControlError::Malformed(format!("{flag} needs a value")));
    };
    *rest = tail;
    Ok(value.clone())
}

/// Split a command line into tokens, honoring `'` and `"` quoting.
fn tokenize(line: &str) -> Result<Vec<String>, ControlError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        return Err(ControlError::Malformed("unterminated quote".to_string()));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(line: &str) -> ArchiveRequest {
        match parse(line, "operator").unwrap() {
            ControlRequest::Archive(request) => request,
            other => panic!("expected archive, got {other:?}"),
        }
    }

    #[test]
    fn plain_archive_defaults_to_root_only() {
        let request = archive("a https://example.com/page#frag");
        assert_eq!(request.url, "https://example.com/page");
        assert_eq!(request.owner, "operator");
        assert_eq!(request.policy, RecursionPolicy::DepthLimit(0));
        assert_eq!(request.concurrency, None);
        assert!(!request.insecure);
        assert!(request.cookies.is_empty());
    }

    #[test]
    fn all_flags_in_long_and_short_form() {
        let request = archive(
            "a https://example.com/ -j 4 -r prefix -k -b session=abc -b theme=dark",
        );
        assert_eq!(request.concurrency, Some(4));
        assert_eq!(
            request.policy,
            RecursionPolicy::PrefixLimit("https://example.com/".to_string())
        );
        assert!(request.insecure);
        assert_eq!(request.cookies.len(), 2);

        let long = archive(
            "a https://example.com/ --concurrency 2 --recursive 3 --insecure --cookie s=1",
        );
        assert_eq!(long.concurrency, Some(2));
        assert_eq!(long.policy, RecursionPolicy::DepthLimit(3));
        assert!(long.insecure);
    }

    #[test]
    fn prefix_policy_uses_the_canonical_url() {
        let request = archive("a https://example.com/dir/#section -r prefix");
        assert_eq!(
            request.policy,
            RecursionPolicy::PrefixLimit("https://example.com/dir/".to_string())
        );
    }

    #[test]
    fn quoted_cookie_values_keep_spaces() {
        let request = archive("a https://example.com/ -b 'greeting=hello world'");
        assert_eq!(request.cookies[0].name, "greeting");
        assert_eq!(request.cookies[0].value, "hello world");
    }

    #[test]
    fn status_and_revoke_take_one_id() {
        assert!(matches!(
            parse("s lusab-babad-lusab-babad", "op").unwrap(),
            ControlRequest::Status(_)
        ));
        assert!(matches!(
            parse("r lusab-babad-lusab-babad", "op").unwrap(),
            ControlRequest::Revoke(_)
        ));
        assert!(parse("s", "op").is_err());
        assert!(parse("r one two", "op").is_err());
    }

    #[test]
    fn rejects_malformed_commands_completely() {
        assert!(parse("", "op").is_err());
        assert!(parse("x https://example.com/", "op").is_err());
        assert!(parse("a", "op").is_err());
        assert!(parse("a not-a-url", "op").is_err());
        assert!(parse("a ftp://example.com/", "op").is_err());
        assert!(parse("a https://example.com/ -j", "op").is_err());
        assert!(parse("a https://example.com/ -j zero", "op").is_err());
        assert!(parse("a https://example.com/ -j 0", "op").is_err());
        assert!(parse("a https://example.com/ -r deep", "op").is_err());
        assert!(parse("a https://example.com/ -b nocookie", "op").is_err());
        assert!(parse("a https://example.com/ --frobnicate", "op").is_err());
        assert!(parse("a 'https://example.com/unterminated", "op").is_err());
    }

    #[test]
    fn bad_policy_is_a_policy_error() {
        assert!(matches!(
            parse("a https://example.com/ -r nope", "op"),
            Err(ControlError::Policy(_))
        ));
    }
}
