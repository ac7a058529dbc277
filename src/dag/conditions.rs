//! Merging and validation of HTTPProxy match conditions.
//!
//! Prefix conditions along an include chain concatenate in traversal order;
//! the result has duplicate slashes collapsed and always starts with `/`.

use crate::model::{Condition, HeaderCondition};

use super::{HeaderMatch, HeaderMatchKind, PathCondition};

/// Where a condition block appears; includes and routes accept different
/// prefix shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionContext {
    Include,
    Route,
}

impl ConditionContext {
    fn as_str(&self) -> &'static str {
        match self {
            ConditionContext::Include => "include",
            ConditionContext::Route => "route",
        }
    }
}

/// Concatenate the prefix conditions of one block onto an inherited prefix.
pub fn merge_prefix(inherited: &str, conditions: &[Condition]) -> String {
    let mut prefix = inherited.to_string();
    for cond in conditions {
        prefix.push_str(&cond.prefix);
    }

    let collapsed = collapse_slashes(&prefix);
    if collapsed.is_empty() {
        "/".to_string()
    } else {
        collapsed
    }
}

/// Build the path condition for a merged prefix. A prefix containing a
/// wildcard segment becomes a wildcard-prefix condition.
pub fn path_condition(prefix: String) -> PathCondition {
    if prefix.contains('*') {
        PathCondition::WildcardPrefix(prefix)
    } else {
        PathCondition::Prefix(prefix)
    }
}

fn collapse_slashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_slash = false;
    for c in input.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push(c);
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

/// Validate the prefix conditions of one block. Encodes the business rules
/// about what may appear in includes versus routes.
pub fn validate_path_conditions(
    conditions: &[Condition],
    context: ConditionContext,
) -> Result<(), String> {
    let mut prefix_count = 0;
    for cond in conditions {
        if cond.prefix.is_empty() {
            continue;
        }
        prefix_count += 1;
        if prefix_count > 1 {
            return Err(format!(
                "{}: more than one prefix is not allowed in a condition block",
                context.as_str()
            ));
        }
        if !cond.prefix.starts_with('/') {
            return Err(format!(
                "{}: prefix conditions must start with /, '{}' was supplied",
                context.as_str(),
                cond.prefix
            ));
        }
        match context {
            ConditionContext::Include => {
                if cond.prefix.contains('*') {
                    return Err(
                        "cannot specify wildcard prefix conditions in an include".to_string()
                    );
                }
            }
            ConditionContext::Route => {
                if cond.prefix.contains("**") {
                    return Err(format!(
                        "cannot specify '**' in a wildcard prefix, '{}' was supplied",
                        cond.prefix
                    ));
                }
                if cond.prefix.ends_with('*') {
                    return Err(format!(
                        "cannot specify a trailing wildcard, '{}' was supplied",
                        cond.prefix
                    ));
                }
                if cond.prefix.starts_with("/*") {
                    return Err(format!(
                        "cannot specify '/*' as a leading wildcard, '{}' was supplied",
                        cond.prefix
                    ));
                }
                if cond.prefix.matches('*').count() > 1 {
                    return Err(format!(
                        "cannot specify more than one wildcard segment, '{}' was supplied",
                        cond.prefix
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Translate the header conditions of one block, enforcing the CRD rule
/// that exactly one match field is set per condition.
pub fn merge_header_conditions(conditions: &[Condition]) -> Result<Vec<HeaderMatch>, String> {
    let mut out = Vec::new();
    for cond in conditions {
        let Some(header) = &cond.header else { continue };
        header.validate().map_err(|e| e.to_string())?;
        out.push(to_header_match(header));
    }
    Ok(out)
}

fn to_header_match(header: &HeaderCondition) -> HeaderMatch {
    if header.present {
        HeaderMatch {
            name: header.name.clone(),
            kind: HeaderMatchKind::Present,
            value: String::new(),
            invert: false,
        }
    } else if !header.contains.is_empty() {
        HeaderMatch {
            name: header.name.clone(),
            kind: HeaderMatchKind::Contains,
            value: header.contains.clone(),
            invert: false,
        }
    } else if !header.not_contains.is_empty() {
        HeaderMatch {
            name: header.name.clone(),
            kind: HeaderMatchKind::Contains,
            value: header.not_contains.clone(),
            invert: true,
        }
    } else if !header.exact.is_empty() {
        HeaderMatch {
            name: header.name.clone(),
            kind: HeaderMatchKind::Exact,
            value: header.exact.clone(),
            invert: false,
        }
    } else {
        HeaderMatch {
            name: header.name.clone(),
            kind: HeaderMatchKind::Exact,
            value: header.not_exact.clone(),
            invert: true,
        }
    }
}

/// Validate a merged header condition set: no two exact matches for the same
/// header, and no contains/notcontains pair on the same header and value.
pub fn validate_header_matches(headers: &[HeaderMatch]) -> Result<(), String> {
    for (i, h) in headers.iter().enumerate() {
        let name = h.name.to_ascii_lowercase();
        for other in headers.iter().skip(i + 1) {
            let other_name = other.name.to_ascii_lowercase();
            if name != other_name {
                continue;
            }
            if h.kind == HeaderMatchKind::Exact
                && other.kind == HeaderMatchKind::Exact
                && !h.invert
                && !other.invert
            {
                return Err(format!("duplicate exact match on header '{}'", h.name));
            }
            if h.kind == HeaderMatchKind::Contains
                && other.kind == HeaderMatchKind::Contains
                && h.value == other.value
                && h.invert != other.invert
            {
                return Err(format!(
                    "contradictory contains/notcontains match on header '{}'",
                    h.name
                ));
            }
        }
    }
    Ok(())
}
