//! Playwright test source generation
//!
//! A compiled [`IrJourney`] renders to one `.spec.ts` file. Every machine-owned region
//! sits in a managed block so later regenerations can be merged with
//! [`crate::blocks::inject_blocks`] without touching hand edits:
//!
//! ```text
//! [imports]                          import { test, expect } ...
//! test.describe('JRN-0001: ...', () => {
//!   test('... @smoke', async ({ page }) => {
//!     [preamble]                     const runId = ...
//!     [AC-1]                         await test.step('AC-1: ...', async () => { ... });
//!     [AC-2] ...
//!   });
//! });
//! ```
//!
//! Each rendered step also records a [`SourceMap`] so a failure location in the
//! generated file can be traced back to the instruction that produced the line.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::blocks::{extract_blocks, inject_blocks, ManagedBlock, MergeReport};
use crate::config::CodegenConfig;
use crate::fsutil::write_atomic;
use crate::ir::{Instruction, IrJourney, LocatorSpec, LocatorStrategy, ToastKind, ValueSpec};
use crate::Result;

pub const IMPORTS_BLOCK: &str = "imports";
pub const PREAMBLE_BLOCK: &str = "preamble";

/// Quote a string as a single-quoted TypeScript literal
pub fn ts_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// A regex literal matching `pattern` as a plain substring
fn ts_regex(pattern: &str) -> String {
    let mut out = String::from("/");
    for c in pattern.chars() {
        if "\\^$.*+?()[]{}|/".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('/');
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn property(object: &str, field: &str) -> String {
    if is_identifier(field) {
        format!("{object}.{field}")
    } else {
        format!("{object}[{}]", ts_string(field))
    }
}

fn options(entries: &[(&str, String)]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let body = entries
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {body} }}")
}

/// Playwright expression addressing `locator`
pub fn render_locator(locator: &LocatorSpec) -> String {
    let exact = locator.is_exact().then(|| ("exact", "true".to_string()));
    let value = ts_string(&locator.value);

    match locator.strategy {
        LocatorStrategy::Role => {
            let opts = locator.options.clone().unwrap_or_default();
            let mut entries = Vec::new();
            if let Some(name) = &opts.name {
                entries.push(("name", ts_string(name)));
            }
            entries.extend(exact);
            if let Some(level) = opts.level {
                entries.push(("level", level.to_string()));
            }
            match options(&entries).as_str() {
                "" => format!("page.getByRole({value})"),
                opts => format!("page.getByRole({value}, {opts})"),
            }
        }
        LocatorStrategy::Label | LocatorStrategy::Placeholder | LocatorStrategy::Text => {
            let method = match locator.strategy {
                LocatorStrategy::Label => "getByLabel",
                LocatorStrategy::Placeholder => "getByPlaceholder",
                _ => "getByText",
            };
            match exact {
                Some(entry) => format!("page.{method}({value}, {})", options(&[entry])),
                None => format!("page.{method}({value})"),
            }
        }
        LocatorStrategy::Testid => format!("page.getByTestId({value})"),
        LocatorStrategy::Css => format!("page.locator({value})"),
        LocatorStrategy::Xpath => {
            let raw = locator.value.trim_start_matches("xpath=");
            format!("page.locator({})", ts_string(&format!("xpath={raw}")))
        }
    }
}

/// TypeScript expression producing a fill value
pub fn render_value(value: &ValueSpec) -> String {
    match value {
        ValueSpec::Literal { value } => ts_string(value),
        ValueSpec::Actor { field } => property("actor", field),
        ValueSpec::RunId { prefix: None } => "runId".to_string(),
        ValueSpec::RunId {
            prefix: Some(prefix),
        } => {
            let escaped = prefix.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${");
            format!("`{escaped}-${{runId}}`")
        }
        ValueSpec::TestData { dataset, field } => {
            property(&format!("testData[{}]", ts_string(dataset)), field)
        }
    }
}

/// ARIA live-region role a toast of this severity is announced with
fn toast_role(kind: ToastKind) -> &'static str {
    match kind {
        ToastKind::Error | ToastKind::Warning => "alert",
        ToastKind::Success | ToastKind::Info => "status",
    }
}

fn timeout_opts(timeout: &Option<u64>) -> Option<String> {
    timeout.map(|t| format!("{{ timeout: {t} }}"))
}

fn with_opts(call: &str, opts: Option<String>) -> String {
    match opts {
        Some(o) => format!("{call}({o})"),
        None => format!("{call}()"),
    }
}

/// Source lines for one instruction, without indentation
pub fn render_instruction(instruction: &Instruction) -> Vec<String> {
    let line = match instruction {
        Instruction::Goto { url, wait_until } => match wait_until {
            Some(state) => format!(
                "await page.goto({}, {{ waitUntil: '{}' }});",
                ts_string(url),
                state.as_str()
            ),
            None => format!("await page.goto({});", ts_string(url)),
        },
        Instruction::Click { locator } => format!("await {}.click();", render_locator(locator)),
        Instruction::DoubleClick { locator } => {
            format!("await {}.dblclick();", render_locator(locator))
        }
        Instruction::Fill { locator, value } => format!(
            "await {}.fill({});",
            render_locator(locator),
            render_value(value)
        ),
        Instruction::Select { locator, option } => format!(
            "await {}.selectOption({});",
            render_locator(locator),
            ts_string(option)
        ),
        Instruction::Check { locator } => format!("await {}.check();", render_locator(locator)),
        Instruction::Uncheck { locator } => {
            format!("await {}.uncheck();", render_locator(locator))
        }
        Instruction::Press { key, locator } => match locator {
            Some(locator) => format!(
                "await {}.press({});",
                render_locator(locator),
                ts_string(key)
            ),
            None => format!("await page.keyboard.press({});", ts_string(key)),
        },
        Instruction::Hover { locator } => format!("await {}.hover();", render_locator(locator)),
        Instruction::ExpectVisible { locator, timeout } => format!(
            "await {};",
            with_opts(
                &format!("expect({}).toBeVisible", render_locator(locator)),
                timeout_opts(timeout)
            )
        ),
        Instruction::ExpectHidden { locator, timeout } => format!(
            "await {};",
            with_opts(
                &format!("expect({}).toBeHidden", render_locator(locator)),
                timeout_opts(timeout)
            )
        ),
        Instruction::ExpectText {
            locator,
            text,
            timeout,
        } => match timeout {
            Some(t) => format!(
                "await expect({}).toContainText({}, {{ timeout: {t} }});",
                render_locator(locator),
                ts_string(text)
            ),
            None => format!(
                "await expect({}).toContainText({});",
                render_locator(locator),
                ts_string(text)
            ),
        },
        Instruction::ExpectUrl { pattern, timeout } => match timeout {
            Some(t) => format!(
                "await expect(page).toHaveURL({}, {{ timeout: {t} }});",
                ts_regex(pattern)
            ),
            None => format!("await expect(page).toHaveURL({});", ts_regex(pattern)),
        },
        Instruction::ExpectTitle { title } => {
            format!("await expect(page).toHaveTitle({});", ts_string(title))
        }
        Instruction::ExpectToast {
            toast_type,
            message,
            timeout,
        } => {
            let base = format!("page.getByRole('{}')", toast_role(*toast_type));
            let toast = match message {
                Some(m) => format!("{base}.filter({{ hasText: {} }})", ts_string(m)),
                None => base,
            };
            format!(
                "await {};",
                with_opts(&format!("expect({toast}).toBeVisible"), timeout_opts(timeout))
            )
        }
        Instruction::WaitForUrl { pattern, timeout } => match timeout {
            Some(t) => format!(
                "await page.waitForURL({}, {{ timeout: {t} }});",
                ts_regex(pattern)
            ),
            None => format!("await page.waitForURL({});", ts_regex(pattern)),
        },
        Instruction::WaitForResponse {
            url_pattern,
            timeout,
        } => {
            let predicate = format!(
                "(response) => response.url().includes({})",
                ts_string(url_pattern)
            );
            match timeout {
                Some(t) => format!("await page.waitForResponse({predicate}, {{ timeout: {t} }});"),
                None => format!("await page.waitForResponse({predicate});"),
            }
        }
        Instruction::WaitForLoadState { state, timeout } => match timeout {
            Some(t) => format!(
                "await page.waitForLoadState('{}', {{ timeout: {t} }});",
                state.as_str()
            ),
            None => format!("await page.waitForLoadState('{}');", state.as_str()),
        },
        Instruction::WaitForVisible { locator, timeout } => {
            let opts = match timeout {
                Some(t) => format!("{{ state: 'visible', timeout: {t} }}"),
                None => "{ state: 'visible' }".to_string(),
            };
            format!("await {}.waitFor({opts});", render_locator(locator))
        }
        Instruction::CallModule {
            module,
            method,
            args,
        } => {
            let mut call_args = vec!["page".to_string()];
            call_args.extend(args.iter().map(|a| ts_string(a)));
            format!("await {module}.{method}({});", call_args.join(", "))
        }
        Instruction::Blocked {
            reason,
            source_text,
        } => {
            return vec![
                format!("// ARTK BLOCKED: {}", reason.replace('\n', " ")),
                format!("// Source: {}", source_text.replace('\n', " ")),
                format!(
                    "throw new Error({});",
                    ts_string(&format!("ARTK BLOCKED: {reason}: {source_text}"))
                ),
            ];
        }
    };
    vec![line]
}

/// Where a content line of a managed block came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapEntry {
    pub block_id: String,
    /// 0-based line within the block content
    pub line_offset: usize,
    pub step_index: usize,
    pub instruction_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    pub entries: Vec<SourceMapEntry>,
}

impl SourceMap {
    pub fn lookup(&self, block_id: &str, line_offset: usize) -> Option<&SourceMapEntry> {
        self.entries
            .iter()
            .find(|e| e.block_id == block_id && e.line_offset == line_offset)
    }

    /// Map a 1-based line of a merged file to `(step_index, instruction_index)`
    pub fn locate(&self, file_content: &str, line: usize) -> Option<(usize, usize)> {
        let (blocks, _) = extract_blocks(file_content);
        let block = blocks.iter().find(|b| b.contains_line(line))?;
        let id = block.block.id.as_deref()?;
        let entry = self.lookup(id, line - block.start_line - 1)?;
        Some((entry.step_index, entry.instruction_index))
    }
}

/// One rendered test file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedTest {
    pub journey_id: String,
    pub file_name: String,
    /// Complete file content, used when no file exists yet
    pub content: String,
    /// Managed blocks in file order, used to merge into an existing file
    pub blocks: Vec<ManagedBlock>,
    pub source_map: SourceMap,
}

/// Outcome of writing a generated test to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub created: bool,
    pub changed: bool,
    pub report: MergeReport,
}

/// `JRN-0001` + `User logs in` → `jrn-0001-user-logs-in.spec.ts`
pub fn test_file_name(id: &str, title: &str) -> String {
    let slug: String = format!("{id} {title}")
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    format!("{slug}.spec.ts")
}

pub struct CodeGenerator {
    config: CodegenConfig,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(CodegenConfig::default())
    }
}

impl CodeGenerator {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }

    fn indent(&self, depth: usize) -> String {
        self.config.indent.repeat(depth)
    }

    fn imports(&self, ir: &IrJourney) -> Vec<String> {
        let mut lines = vec!["import { test, expect } from '@playwright/test';".to_string()];

        let uses_actor = ir.actor.is_some()
            || ir.instructions().any(|i| {
                matches!(
                    i,
                    Instruction::Fill {
                        value: ValueSpec::Actor { .. },
                        ..
                    }
                )
            });
        let uses_data = ir.instructions().any(|i| {
            matches!(
                i,
                Instruction::Fill {
                    value: ValueSpec::TestData { .. },
                    ..
                }
            )
        });
        let fixtures: Vec<&str> = [(uses_actor, "actors"), (uses_data, "testData")]
            .into_iter()
            .filter_map(|(used, name)| used.then_some(name))
            .collect();
        if !fixtures.is_empty() {
            lines.push(format!(
                "import {{ {} }} from {};",
                fixtures.join(", "),
                ts_string(&self.config.fixtures_import)
            ));
        }

        let modules: BTreeSet<&str> = ir
            .instructions()
            .filter_map(|i| match i {
                Instruction::CallModule { module, .. } => Some(module.as_str()),
                _ => None,
            })
            .collect();
        for module in modules {
            let base = self.config.modules_import_base.trim_end_matches('/');
            lines.push(format!(
                "import * as {module} from {};",
                ts_string(&format!("{base}/{module}"))
            ));
        }
        lines
    }

    fn preamble(&self, ir: &IrJourney, depth: usize) -> Vec<String> {
        let pad = self.indent(depth);
        let mut lines = vec![format!("{pad}const runId = Date.now().toString(36);")];
        let uses_actor = ir.instructions().any(|i| {
            matches!(
                i,
                Instruction::Fill {
                    value: ValueSpec::Actor { .. },
                    ..
                }
            )
        });
        if let Some(actor) = &ir.actor {
            lines.push(format!("{pad}const actor = actors[{}];", ts_string(actor)));
        } else if uses_actor {
            lines.push(format!("{pad}const actor = actors['default'];"));
        }
        lines
    }

    /// Render a compiled Journey
    pub fn generate(&self, ir: &IrJourney) -> GeneratedTest {
        let outer = self.indent(1);
        let body_depth = 2;
        let body = self.indent(body_depth);

        let mut blocks = Vec::new();
        let mut source_map = SourceMap::default();

        let imports = ManagedBlock::new(IMPORTS_BLOCK, self.imports(ir).join("\n"));
        let preamble = ManagedBlock::new(PREAMBLE_BLOCK, self.preamble(ir, body_depth).join("\n"));
        blocks.push(imports.clone());
        blocks.push(preamble.clone());

        let mut step_blocks = Vec::new();
        for (step_index, step) in ir.steps.iter().enumerate() {
            let inner = self.indent(body_depth + 1);
            let title = if step.description == step.id {
                step.id.clone()
            } else {
                format!("{}: {}", step.id, step.description)
            };
            let mut lines = vec![format!(
                "{body}await test.step({}, async () => {{",
                ts_string(&title)
            )];
            for (instruction_index, instruction) in step.instructions.iter().enumerate() {
                for rendered in render_instruction(instruction) {
                    source_map.entries.push(SourceMapEntry {
                        block_id: step.id.clone(),
                        line_offset: lines.len(),
                        step_index,
                        instruction_index,
                    });
                    lines.push(format!("{inner}{rendered}"));
                }
            }
            lines.push(format!("{body}}});"));

            let block = ManagedBlock::new(step.id.clone(), lines.join("\n"));
            blocks.push(block.clone());
            step_blocks.push(block);
        }

        let mut tags = vec![format!("@{}", ir.tier)];
        tags.extend(ir.tags.iter().map(|t| format!("@{t}")));

        let mut out: Vec<String> = Vec::new();
        out.push(format!(
            "// {}: {}. Edit outside ARTK managed blocks only.",
            ir.id, ir.title
        ));
        out.extend(imports.render_lines(""));
        out.push(String::new());
        out.push(format!(
            "test.describe({}, () => {{",
            ts_string(&format!("{}: {}", ir.id, ir.title))
        ));
        out.push(format!(
            "{outer}test({}, async ({{ page }}) => {{",
            ts_string(&format!("{} {}", ir.title, tags.join(" ")))
        ));
        out.extend(preamble.render_lines(&body));
        for block in &step_blocks {
            out.push(String::new());
            out.extend(block.render_lines(&body));
        }
        out.push(format!("{outer}}});"));
        out.push("});".to_string());
        out.push(String::new());

        debug!(journey = %ir.id, blocks = blocks.len(), "rendered test source");
        GeneratedTest {
            journey_id: ir.id.clone(),
            file_name: test_file_name(&ir.id, &ir.title),
            content: out.join("\n"),
            blocks,
            source_map,
        }
    }

    /// Merge a generated test into `path`, creating the file when absent
    pub fn write(&self, generated: &GeneratedTest, path: &Path) -> Result<WriteOutcome> {
        if !path.exists() {
            write_atomic(path, generated.content.as_bytes())?;
            info!(path = %path.display(), "created test file");
            return Ok(WriteOutcome {
                created: true,
                changed: true,
                report: MergeReport {
                    appended: generated
                        .blocks
                        .iter()
                        .filter_map(|b| b.id.clone())
                        .collect(),
                    ..Default::default()
                },
            });
        }

        let existing = std::fs::read_to_string(path)?;
        let merged = inject_blocks(&existing, &generated.blocks)?;
        let changed = merged.content != existing;
        if changed {
            write_atomic(path, merged.content.as_bytes())?;
        }
        info!(
            path = %path.display(),
            replaced = merged.report.replaced.len(),
            appended = merged.report.appended.len(),
            changed,
            "merged test file"
        );
        Ok(WriteOutcome {
            created: false,
            changed,
            report: merged.report,
        })
    }
}
