//! Phrase rules shared by the structured and legacy tiers
//!
//! Each rule is a case-insensitive regex plus a builder turning its captures into an
//! instruction. Rules are grouped into families so the structured tier can restrict
//! `Action:` lines to actions, `Assert:` lines to assertions, and so on.

use regex::{Captures, Regex};

use crate::ir::{Instruction, LoadState, LocatorSpec, ToastKind, ValueSpec};
use crate::locator::LocatorResolver;

/// Which kind of phrase a rule recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Module,
    Navigation,
    Interaction,
    Wait,
    Assertion,
}

type Builder = fn(&Captures<'_>, &LocatorResolver) -> Option<Instruction>;

pub(crate) struct PatternRule {
    pub name: &'static str,
    pub family: Family,
    regex: Regex,
    build: Builder,
}

impl PatternRule {
    fn new(name: &'static str, family: Family, pattern: &str, build: Builder) -> Self {
        let regex = Regex::new(&format!("(?i){pattern}")).expect("static pattern");
        Self {
            name,
            family,
            regex,
            build,
        }
    }

    pub fn apply(&self, text: &str, resolver: &LocatorResolver) -> Option<Instruction> {
        let captures = self.regex.captures(text)?;
        (self.build)(&captures, resolver)
    }
}

// Fragments
const Q: &str = r#"["'`“”]"#;
const NQ: &str = r#"[^"'`“”]"#;
const ROLE: &str = r"button|link|tab|menu ?item|checkbox|radio|option|heading|textbox|combobox";

fn cap<'a>(c: &'a Captures<'_>, name: &str) -> Option<&'a str> {
    c.name(name).map(|m| m.as_str().trim()).filter(|s| !s.is_empty())
}

fn normalize_role(role: &str) -> String {
    role.to_lowercase().replace(' ', "")
}

fn strip_quotes(value: &str) -> &str {
    value.trim_matches(|c| matches!(c, '"' | '\'' | '`' | '“' | '”'))
}

fn pick(resolver: &LocatorResolver, candidates: Vec<LocatorSpec>) -> Option<LocatorSpec> {
    resolver.resolve(&candidates)
}

fn element(c: &Captures<'_>, resolver: &LocatorResolver) -> Option<LocatorSpec> {
    let role = cap(c, "role").map(normalize_role);
    if let Some(name) = cap(c, "name") {
        let candidates = LocatorResolver::candidates_for(strip_quotes(name), role.as_deref());
        return pick(resolver, candidates);
    }
    let target = cap(c, "target")?;
    pick(
        resolver,
        LocatorResolver::candidates_for(strip_quotes(target), role.as_deref()),
    )
}

fn field(c: &Captures<'_>, resolver: &LocatorResolver) -> Option<LocatorSpec> {
    let name = cap(c, "field")?;
    pick(resolver, LocatorResolver::field_candidates(strip_quotes(name)))
}

/// Interpret a value literal: `{{actor.email}}`, `{{runId}}`, `{{runId:order}}`,
/// `{{testData.users.email}}`, or plain text
pub(crate) fn parse_value(raw: &str) -> ValueSpec {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim);

    if let Some(inner) = inner {
        if let Some(field) = inner.strip_prefix("actor.") {
            return ValueSpec::Actor {
                field: field.to_string(),
            };
        }
        if inner == "runId" {
            return ValueSpec::RunId { prefix: None };
        }
        if let Some(prefix) = inner.strip_prefix("runId:") {
            return ValueSpec::RunId {
                prefix: Some(prefix.to_string()),
            };
        }
        if let Some(rest) = inner.strip_prefix("testData.") {
            if let Some((dataset, field)) = rest.split_once('.') {
                return ValueSpec::TestData {
                    dataset: dataset.to_string(),
                    field: field.to_string(),
                };
            }
        }
    }
    ValueSpec::literal(raw)
}

fn url_of(raw: &str) -> String {
    strip_quotes(raw.trim()).to_string()
}

fn page_slug(page: &str) -> String {
    let slug: Vec<String> = page
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w != "home")
        .collect();
    format!("/{}", slug.join("-"))
}

fn key_name(raw: &str) -> String {
    let key = strip_quotes(raw.trim());
    match key.to_lowercase().as_str() {
        "enter" | "return" => "Enter".to_string(),
        "tab" => "Tab".to_string(),
        "esc" | "escape" => "Escape".to_string(),
        "space" => "Space".to_string(),
        "backspace" => "Backspace".to_string(),
        "delete" => "Delete".to_string(),
        "arrowup" | "arrow up" => "ArrowUp".to_string(),
        "arrowdown" | "arrow down" => "ArrowDown".to_string(),
        "arrowleft" | "arrow left" => "ArrowLeft".to_string(),
        "arrowright" | "arrow right" => "ArrowRight".to_string(),
        _ => key.to_string(),
    }
}

fn toast_kind(raw: Option<&str>) -> ToastKind {
    match raw.map(str::to_lowercase).as_deref() {
        Some("success") => ToastKind::Success,
        Some("error") => ToastKind::Error,
        Some("warning") => ToastKind::Warning,
        _ => ToastKind::Info,
    }
}

/// All phrase rules, in evaluation order
pub(crate) fn rules() -> Vec<PatternRule> {
    vec![
        // --- modules -----------------------------------------------------------
        PatternRule::new(
            "login-as",
            Family::Module,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:logs?\s*in|login|signs?\s+in)(?:\s+as\s+(?:an?\s+)?{Q}?(?P<actor>[\w-]+){Q}?)?(?:\s+user)?$"),
            |c, _| {
                Some(Instruction::CallModule {
                    module: "auth".to_string(),
                    method: "login".to_string(),
                    args: cap(c, "actor").map(|a| vec![a.to_string()]).unwrap_or_default(),
                })
            },
        ),
        PatternRule::new(
            "logout",
            Family::Module,
            r"^(?:the\s+)?(?:user\s+)?(?:logs?\s*out|logout|signs?\s+out)$",
            |_, _| {
                Some(Instruction::CallModule {
                    module: "auth".to_string(),
                    method: "logout".to_string(),
                    args: Vec::new(),
                })
            },
        ),
        // --- navigation --------------------------------------------------------
        PatternRule::new(
            "navigate-url",
            Family::Navigation,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:navigates?|goes|go|browses?|opens?|visits?)\s+(?:to\s+)?(?:the\s+)?(?:page\s+|url\s+)?(?P<url>{Q}?(?:/|https?://){NQ}*{Q}?)$"),
            |c, _| {
                Some(Instruction::Goto {
                    url: url_of(cap(c, "url")?),
                    wait_until: None,
                })
            },
        ),
        PatternRule::new(
            "navigate-page",
            Family::Navigation,
            r"^(?:the\s+)?(?:user\s+)?(?:navigates?|goes|go|opens?|visits?)\s+(?:to\s+)?(?:the\s+)?(?P<page>[a-z][\w\s-]*?)\s+page$",
            |c, _| {
                Some(Instruction::Goto {
                    url: page_slug(cap(c, "page")?),
                    wait_until: None,
                })
            },
        ),
        // --- waits -------------------------------------------------------------
        PatternRule::new(
            "wait-url",
            Family::Wait,
            &format!(r"^wait\s+(?:for\s+)?(?:the\s+)?(?:url|page)\s+to\s+(?:contain|be|match|change\s+to)\s+(?P<url>{Q}?{NQ}+?{Q}?)$"),
            |c, _| {
                Some(Instruction::WaitForUrl {
                    pattern: url_of(cap(c, "url")?),
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "wait-load",
            Family::Wait,
            r"^wait\s+(?:for\s+)?(?:the\s+)?(?P<what>page\s+to\s+load|network\s+(?:to\s+be\s+)?idle|loading\s+to\s+(?:complete|finish)|dom\s+to\s+load)$",
            |c, _| {
                let what = cap(c, "what")?.to_lowercase();
                let state = if what.starts_with("page") {
                    LoadState::Load
                } else if what.starts_with("dom") {
                    LoadState::Domcontentloaded
                } else {
                    LoadState::Networkidle
                };
                Some(Instruction::WaitForLoadState {
                    state,
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "wait-response",
            Family::Wait,
            &format!(r"^wait\s+for\s+(?:the\s+)?(?:api\s+)?response\s+(?:from\s+|to\s+)?(?P<url>{Q}?{NQ}+?{Q}?)$"),
            |c, _| {
                Some(Instruction::WaitForResponse {
                    url_pattern: url_of(cap(c, "url")?),
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "wait-visible",
            Family::Wait,
            &format!(r"^wait\s+(?:for|until)\s+(?:the\s+)?{Q}(?P<target>{NQ}+){Q}(?:\s+(?P<role>{ROLE}))?(?:\s+(?:to\s+)?(?:be\s+|is\s+)?(?:appears?|visible|shown|displayed))?$"),
            |c, r| {
                // quoted paths are URL waits
                if cap(c, "target")?.starts_with('/') {
                    return None;
                }
                Some(Instruction::WaitForVisible {
                    locator: element(c, r)?,
                    timeout: None,
                })
            },
        ),
        // --- assertions --------------------------------------------------------
        PatternRule::new(
            "assert-url",
            Family::Assertion,
            &format!(r"^(?:(?:verify|assert|ensure|confirm|check)\s+(?:that\s+)?)?(?:the\s+)?(?:page\s+)?url\s+(?:should\s+)?(?:contains?|is|be|matches|equals|includes)\s+(?P<url>{Q}?{NQ}+?{Q}?)$"),
            |c, _| {
                Some(Instruction::ExpectUrl {
                    pattern: url_of(cap(c, "url")?),
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "assert-redirect",
            Family::Assertion,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:is\s+|should\s+be\s+)?(?:redirected|taken|sent)\s+to\s+(?:the\s+)?(?P<url>{Q}?/{NQ}*?{Q}?)$"),
            |c, _| {
                Some(Instruction::ExpectUrl {
                    pattern: url_of(cap(c, "url")?),
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "assert-title",
            Family::Assertion,
            &format!(r"^(?:(?:verify|assert|ensure)\s+(?:that\s+)?)?(?:the\s+)?(?:page\s+)?title\s+(?:should\s+be|is|equals)\s+{Q}(?P<title>{NQ}+){Q}$"),
            |c, _| {
                Some(Instruction::ExpectTitle {
                    title: cap(c, "title")?.to_string(),
                })
            },
        ),
        PatternRule::new(
            "assert-toast",
            Family::Assertion,
            &format!(r"^(?:an?\s+)?(?:(?P<kind>success|error|info|warning)\s+)?(?:toast|notification|snackbar)(?:\s+message)?\s+(?:(?:with\s+)?{Q}(?P<msg>{NQ}+){Q}\s+)?(?:appears|is\s+shown|is\s+displayed|should\s+appear)(?:\s+with\s+{Q}(?P<msg2>{NQ}+){Q})?$"),
            |c, _| {
                let message = cap(c, "msg").or_else(|| cap(c, "msg2")).map(str::to_string);
                Some(Instruction::ExpectToast {
                    toast_type: toast_kind(cap(c, "kind")),
                    message,
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "assert-hidden",
            Family::Assertion,
            &format!(r"^(?:(?:verify|assert|ensure|confirm|check)\s+(?:that\s+)?)?(?:the\s+)?{Q}(?P<target>{NQ}+){Q}(?:\s+(?P<role>{ROLE}))?\s+(?:is|should\s+be|are)\s+(?:hidden|not\s+visible|not\s+displayed|gone)$"),
            |c, r| {
                Some(Instruction::ExpectHidden {
                    locator: element(c, r)?,
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "assert-visible",
            Family::Assertion,
            &format!(r"^(?:(?:verify|assert|ensure|confirm|check)\s+(?:that\s+)?)?(?:the\s+)?{Q}(?P<target>{NQ}+){Q}(?:\s+(?P<role>{ROLE}))?\s+(?:is|should\s+be|are)\s+(?:visible|displayed|shown|present)$"),
            |c, r| {
                Some(Instruction::ExpectVisible {
                    locator: element(c, r)?,
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "assert-sees",
            Family::Assertion,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:should\s+)?sees?\s+(?:the\s+|a\s+)?(?:text\s+|message\s+)?{Q}(?P<target>{NQ}+){Q}(?:\s+(?P<role>{ROLE}))?(?:\s+(?:message|text))?$"),
            |c, r| {
                Some(Instruction::ExpectVisible {
                    locator: element(c, r)?,
                    timeout: None,
                })
            },
        ),
        PatternRule::new(
            "assert-text",
            Family::Assertion,
            &format!(r"^(?:(?:verify|assert|ensure)\s+(?:that\s+)?)?(?:the\s+)?{Q}(?P<target>{NQ}+){Q}(?:\s+(?P<role>{ROLE}))?\s+(?:should\s+)?(?:contains?|has\s+text|have\s+text|shows?|displays?)\s+{Q}(?P<text>{NQ}+){Q}$"),
            |c, r| {
                Some(Instruction::ExpectText {
                    locator: element(c, r)?,
                    text: cap(c, "text")?.to_string(),
                    timeout: None,
                })
            },
        ),
        // --- interactions ------------------------------------------------------
        PatternRule::new(
            "fill-field-with",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:fills?|enters?|types?|inputs?)\s+(?:in\s+|out\s+)?(?:the\s+)?(?P<field>{Q}{NQ}+{Q}|[\w][\w\s-]*?)(?:\s+(?:field|input|textbox|box))?\s+with\s+{Q}(?P<value>{NQ}*){Q}$"),
            |c, r| {
                Some(Instruction::Fill {
                    locator: field(c, r)?,
                    value: parse_value(c.name("value")?.as_str()),
                })
            },
        ),
        PatternRule::new(
            "enter-value-into",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:enters?|types?|inputs?|fills?\s+in)\s+{Q}(?P<value>{NQ}*){Q}\s+(?:in|into|as)\s+(?:the\s+)?(?P<field>{Q}{NQ}+{Q}|[\w][\w\s-]*?)(?:\s+(?:field|input|textbox|box))?$"),
            |c, r| {
                Some(Instruction::Fill {
                    locator: field(c, r)?,
                    value: parse_value(c.name("value")?.as_str()),
                })
            },
        ),
        PatternRule::new(
            "select-option",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:selects?|chooses?)\s+{Q}(?P<option>{NQ}+){Q}\s+(?:from|in)\s+(?:the\s+)?(?P<field>{Q}{NQ}+{Q}|[\w][\w\s-]*?)(?:\s+(?:dropdown|select|list|menu))?$"),
            |c, r| {
                let name = strip_quotes(cap(c, "field")?);
                let candidates = vec![
                    LocatorSpec::new(crate::ir::LocatorStrategy::Label, name),
                    LocatorSpec::role("combobox", name),
                ];
                Some(Instruction::Select {
                    locator: pick(r, candidates)?,
                    option: cap(c, "option")?.to_string(),
                })
            },
        ),
        PatternRule::new(
            "check-box",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?P<op>check|uncheck|ticks?|unticks?|checks|unchecks)\s+(?:the\s+)?(?P<name>{Q}{NQ}+{Q}|[\w][\w\s-]*?)(?:\s+(?:checkbox|box|option))?$"),
            |c, r| {
                let name = strip_quotes(cap(c, "name")?);
                let candidates = vec![
                    LocatorSpec::role("checkbox", name),
                    LocatorSpec::new(crate::ir::LocatorStrategy::Label, name),
                ];
                let locator = pick(r, candidates)?;
                let op = cap(c, "op")?.to_lowercase();
                if op.starts_with("un") {
                    Some(Instruction::Uncheck { locator })
                } else {
                    Some(Instruction::Check { locator })
                }
            },
        ),
        PatternRule::new(
            "double-click",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?double[\s-]?clicks?\s+(?:on\s+)?(?:the\s+)?(?P<name>{Q}{NQ}+{Q}|[\w][\w\s-]*?)(?:\s+(?P<role>{ROLE}))?$"),
            |c, r| {
                Some(Instruction::DoubleClick {
                    locator: element(c, r)?,
                })
            },
        ),
        PatternRule::new(
            "click-role-named",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:clicks?|taps?|press(?:es)?|hits?)\s+(?:on\s+)?(?:the\s+)?(?P<name>{Q}{NQ}+{Q}|[\w][\w\s-]*?)\s+(?P<role>{ROLE})$"),
            |c, r| {
                Some(Instruction::Click {
                    locator: element(c, r)?,
                })
            },
        ),
        PatternRule::new(
            "click-role-quoted",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:clicks?|taps?)\s+(?:on\s+)?(?:the\s+)?(?P<role>{ROLE})\s+{Q}(?P<name>{NQ}+){Q}$"),
            |c, r| {
                Some(Instruction::Click {
                    locator: element(c, r)?,
                })
            },
        ),
        PatternRule::new(
            "press-key",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?press(?:es)?\s+(?:the\s+)?(?P<key>{Q}?(?:enter|return|tab|escape|esc|space|backspace|delete|arrow\s?(?:up|down|left|right)){Q}?)(?:\s+key)?(?:\s+(?:in|on)\s+(?:the\s+)?{Q}?(?P<field>{NQ}+?){Q}?(?:\s+field)?)?$"),
            |c, r| {
                let locator = match cap(c, "field") {
                    Some(_) => Some(field(c, r)?),
                    None => None,
                };
                Some(Instruction::Press {
                    key: key_name(cap(c, "key")?),
                    locator,
                })
            },
        ),
        PatternRule::new(
            "hover",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?hovers?\s+(?:over\s+|on\s+)?(?:the\s+)?(?P<name>{Q}{NQ}+{Q}|[\w][\w\s-]*?)(?:\s+(?P<role>{ROLE}))?$"),
            |c, r| {
                Some(Instruction::Hover {
                    locator: element(c, r)?,
                })
            },
        ),
        PatternRule::new(
            "click-target",
            Family::Interaction,
            &format!(r"^(?:the\s+)?(?:user\s+)?(?:clicks?|taps?)\s+(?:on\s+)?(?:the\s+)?(?P<target>{Q}{NQ}+{Q}|[\w#.\[][^\s].*?)$"),
            |c, r| {
                Some(Instruction::Click {
                    locator: element(c, r)?,
                })
            },
        ),
    ]
}
