//! Pipeline orchestration
//!
//! Each command loads the persisted state, checks that its target stage is reachable,
//! does its work, records a history entry and saves the state before returning. A
//! rejected transition leaves the state file untouched.
//!
//! | command    | stage after                          |
//! |------------|--------------------------------------|
//! | `analyze`  | analyzed                             |
//! | `plan`     | planned                              |
//! | `generate` | generated                            |
//! | `test`     | tested, or completed when all pass   |
//! | `heal`     | completed, or blocked                |
//! | `clean`    | initial                              |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use artk_common::codegen::{test_file_name, CodeGenerator};
use artk_common::config::{ArtkConfig, PathsConfig};
use artk_common::fsutil::write_json_atomic;
use artk_common::ir::IrJourney;
use artk_common::journey::{
    build_ir, discover_journeys, load_journey, validate_journey, CoverageSummary, Journey,
};
use artk_common::matcher::{CascadingMatcher, CommandClient, KnowledgeBase, LlmClient, MatchContext};
use artk_common::state::{LoadedState, PipelineState, Stage, StateStore};
use artk_common::telemetry::TelemetrySink;
use artk_common::LocatorResolver;

use crate::classifier::{classify, ClassifiedFailure};
use crate::error::{E2eError, E2eResult};
use crate::healing::{HealingEngine, HealingLog, HealingSession};
use crate::runner::{run_test_file, ProcessRunner, RunOutcome, TestExecutor};

/// Configuration file name looked up in the project root
pub const CONFIG_FILE: &str = "artk.toml";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneySummary {
    pub id: String,
    pub title: String,
    pub path: PathBuf,
    pub steps: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub journey_id: String,
    pub path: PathBuf,
    pub created: bool,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub outcome: RunOutcome,
    pub failures: Vec<ClassifiedFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealReport {
    pub sessions: Vec<HealingSession>,
    pub stage: Stage,
}

pub struct Pipeline {
    root: PathBuf,
    config: ArtkConfig,
    paths: PathsConfig,
    store: StateStore,
    executor: Arc<dyn TestExecutor>,
    ai_client: Option<Arc<dyn LlmClient>>,
}

impl Pipeline {
    pub fn new(root: impl AsRef<Path>, config: ArtkConfig) -> E2eResult<Self> {
        config.validate()?;
        let root = root.as_ref();
        let paths = config.paths.resolve(root);
        let working_dir = match &config.runner.working_dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        };
        let executor = ProcessRunner::new(&config.runner).with_working_dir(working_dir);
        let ai_client = CommandClient::from_config(&config.ai)
            .map(|client| Arc::new(client) as Arc<dyn LlmClient>);

        Ok(Self {
            root: root.to_path_buf(),
            store: StateStore::new(&paths.state_file),
            paths,
            config,
            executor: Arc::new(executor),
            ai_client,
        })
    }

    /// Open a project, reading `artk.toml` from its root when present
    pub fn open(root: impl AsRef<Path>) -> E2eResult<Self> {
        let config = ArtkConfig::load(&root.as_ref().join(CONFIG_FILE))?;
        Self::new(root, config)
    }

    pub fn with_executor(mut self, executor: Arc<dyn TestExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the client built from `ai.command`
    pub fn with_ai_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.ai_client = Some(client);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    fn begin(&self, command: &str, target: Stage) -> E2eResult<PipelineState> {
        let state = self.store.load().state;
        let check = state.can_proceed_to(target);
        if !check.allowed {
            warn!(command, from = %state.stage, to = %target, reason = %check.reason, "command rejected");
            return Err(E2eError::StageRejected {
                command: command.to_string(),
                reason: check.reason,
            });
        }
        Ok(state)
    }

    /// Record a failed command and hand back its error
    fn fail(&self, mut state: PipelineState, command: &str, err: E2eError) -> E2eError {
        state.record(command, false);
        if let Err(e) = self.store.save(&state) {
            warn!(error = %e, "could not persist pipeline state");
        }
        err
    }

    fn commit(&self, mut state: PipelineState, command: &str, target: Stage) -> E2eResult<PipelineState> {
        state.transition(target)?;
        state.record(command, true);
        self.store.save(&state)?;
        info!(command, stage = %state.stage, "pipeline advanced");
        Ok(state)
    }

    fn ir_path(&self, journey_id: &str) -> PathBuf {
        self.paths.ir_dir.join(format!("{journey_id}.json"))
    }

    fn load_ir(&self, journey_id: &str) -> E2eResult<IrJourney> {
        let path = self.ir_path(journey_id);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| E2eError::MissingIr(journey_id.to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load_all_ir(&self, state: &PipelineState) -> E2eResult<Vec<IrJourney>> {
        state.journey_ids.iter().map(|id| self.load_ir(id)).collect()
    }

    fn test_path(&self, ir: &IrJourney) -> PathBuf {
        self.paths
            .tests_dir
            .join(test_file_name(&ir.id, &ir.title))
    }

    fn journeys(&self, only: &[String]) -> E2eResult<Vec<(PathBuf, Journey)>> {
        let files = discover_journeys(&self.paths.journeys_dir);
        if files.is_empty() {
            return Err(E2eError::NoJourneys(self.paths.journeys_dir.clone()));
        }
        let mut journeys = Vec::new();
        for file in files {
            let journey = load_journey(&file)?;
            if only.is_empty() || only.iter().any(|id| id == journey.id()) {
                journeys.push((file, journey));
            }
        }
        Ok(journeys)
    }

    /// Parse and validate journeys. `only` restricts the run to the given ids.
    pub fn analyze(&self, only: &[String]) -> E2eResult<Vec<JourneySummary>> {
        const COMMAND: &str = "analyze";
        let mut state = self.begin(COMMAND, Stage::Analyzed)?;

        let files = discover_journeys(&self.paths.journeys_dir);
        if files.is_empty() {
            let err = E2eError::NoJourneys(self.paths.journeys_dir.clone());
            return Err(self.fail(state, COMMAND, err));
        }

        let mut summaries = Vec::new();
        let mut failed = 0;
        for file in files {
            let journey = match load_journey(&file) {
                Ok(journey) => journey,
                Err(e) => {
                    warn!(path = %file.display(), code = e.code(), error = %e, "journey does not parse");
                    failed += 1;
                    continue;
                }
            };
            if !only.is_empty() && !only.iter().any(|id| id == journey.id()) {
                continue;
            }

            let report = validate_journey(&journey);
            for issue in &report.issues {
                warn!(journey = %journey.id(), code = %issue.code, "{}", issue.message);
            }
            if !report.is_valid() {
                failed += 1;
                continue;
            }
            summaries.push(JourneySummary {
                id: journey.id().to_string(),
                title: journey.frontmatter.title.clone(),
                path: file,
                steps: journey.steps.len(),
                warnings: report.warnings().map(|i| i.message.clone()).collect(),
            });
        }

        if failed > 0 {
            return Err(self.fail(state, COMMAND, E2eError::AnalysisFailed { count: failed }));
        }

        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        state.journey_ids = summaries.iter().map(|s| s.id.clone()).collect();
        self.commit(state, COMMAND, Stage::Analyzed)?;
        Ok(summaries)
    }

    /// Compile analyzed journeys to IR
    pub fn plan(&self) -> E2eResult<Vec<CoverageSummary>> {
        const COMMAND: &str = "plan";
        let state = self.begin(COMMAND, Stage::Planned)?;
        match self.compile_all(&state) {
            Ok(summaries) => {
                self.commit(state, COMMAND, Stage::Planned)?;
                Ok(summaries)
            }
            Err(e) => Err(self.fail(state, COMMAND, e)),
        }
    }

    fn compile_all(&self, state: &PipelineState) -> E2eResult<Vec<CoverageSummary>> {
        let knowledge = match &self.config.matcher.knowledge_path {
            Some(path) => Some(KnowledgeBase::load(&self.root.join(path))?),
            None => None,
        };
        let matcher = CascadingMatcher::from_config(&self.config, knowledge, self.ai_client.clone())?;
        let resolver = LocatorResolver::from_config(&self.config.locators)?;
        let telemetry = TelemetrySink::new(&self.paths.telemetry_file);
        let mut ctx = MatchContext::new();

        let mut summaries = Vec::new();
        for (_, journey) in self.journeys(&state.journey_ids)? {
            let (ir, summary) = build_ir(&journey, &matcher, &resolver, &mut ctx);
            write_json_atomic(&self.ir_path(&ir.id), &ir)?;
            telemetry.append_best_effort(&ctx.drain_telemetry());
            summaries.push(summary);
        }
        info!(
            journeys = summaries.len(),
            ai_calls = ctx.ai_calls(),
            ai_spent_usd = ctx.ai_spent_usd(),
            "planning finished"
        );
        Ok(summaries)
    }

    /// Render compiled IR into test files, merging into existing ones
    pub fn generate(&self) -> E2eResult<Vec<GeneratedFile>> {
        const COMMAND: &str = "generate";
        let mut state = self.begin(COMMAND, Stage::Generated)?;
        match self.generate_all(&state) {
            Ok(files) => {
                state.test_paths = files.iter().map(|f| f.path.display().to_string()).collect();
                self.commit(state, COMMAND, Stage::Generated)?;
                Ok(files)
            }
            Err(e) => Err(self.fail(state, COMMAND, e)),
        }
    }

    fn generate_all(&self, state: &PipelineState) -> E2eResult<Vec<GeneratedFile>> {
        let generator = CodeGenerator::new(self.config.codegen.clone());
        let mut files = Vec::new();
        for ir in self.load_all_ir(state)? {
            let generated = generator.generate(&ir);
            let path = self.paths.tests_dir.join(&generated.file_name);
            let outcome = generator.write(&generated, &path)?;
            for warning in &outcome.report.warnings {
                warn!(path = %path.display(), "{warning}");
            }
            files.push(GeneratedFile {
                journey_id: ir.id.clone(),
                path,
                created: outcome.created,
                changed: outcome.changed,
            });
        }
        Ok(files)
    }

    /// Run every generated test
    pub async fn test(&self) -> E2eResult<TestReport> {
        const COMMAND: &str = "test";
        let mut state = self.begin(COMMAND, Stage::Tested)?;
        let irs = match self.load_all_ir(&state) {
            Ok(irs) => irs,
            Err(e) => return Err(self.fail(state, COMMAND, e)),
        };
        let paths: Vec<PathBuf> = irs.iter().map(|ir| self.test_path(ir)).collect();

        let outcome = self.executor.run(&paths).await;
        let failures = classify(&outcome);
        for failure in &failures {
            warn!(
                category = %failure.category,
                location = ?failure.location.as_ref().map(|l| l.to_string()),
                "{}",
                failure.suggestion
            );
        }

        state.transition(Stage::Tested)?;
        if outcome.passed() {
            state.transition(Stage::Completed)?;
        }
        state.record(COMMAND, outcome.passed());
        self.store.save(&state)?;
        info!(status = outcome.status.as_str(), stage = %state.stage, "test run recorded");
        Ok(TestReport { outcome, failures })
    }

    /// Run the healing loop for every failing journey
    pub async fn heal(&self) -> E2eResult<HealReport> {
        const COMMAND: &str = "heal";
        let mut state = self.begin(COMMAND, Stage::Refining)?;
        state.transition(Stage::Refining)?;
        self.store.save(&state)?;

        let irs = match self.load_all_ir(&state) {
            Ok(irs) => irs,
            Err(e) => return Err(self.fail(state, COMMAND, e)),
        };

        let engine = HealingEngine::new(
            self.config.healing.clone(),
            CodeGenerator::new(self.config.codegen.clone()),
            LocatorResolver::from_config(&self.config.locators)?,
        );
        let log = HealingLog::new(&self.paths.healing_log);

        let mut sessions = Vec::new();
        for mut ir in irs {
            let path = self.test_path(&ir);
            let outcome = run_test_file(self.executor.as_ref(), &path).await;
            if outcome.passed() {
                continue;
            }

            let session = match engine.heal(&mut ir, &path, outcome, self.executor.as_ref()).await {
                Ok(session) => session,
                Err(e) => return Err(self.fail(state, COMMAND, e)),
            };
            if session.applied_count() > 0 {
                if let Err(e) = write_json_atomic(&self.ir_path(&ir.id), &ir) {
                    return Err(self.fail(state, COMMAND, e.into()));
                }
            }
            if let Err(e) = log.append(&session) {
                warn!(error = %e, "could not write healing log");
            }
            state.refinement_attempts += session.applied_count() as u32;
            sessions.push(session);
        }

        let unhealed: Vec<String> = sessions
            .iter()
            .filter(|s| !s.is_healed())
            .map(|s| {
                let outcome = s.outcome.map(|o| o.as_str()).unwrap_or("unknown");
                format!("{}: {outcome}", s.journey_id)
            })
            .collect();

        if unhealed.is_empty() {
            state.transition(Stage::Completed)?;
        } else {
            let reason = format!("healing did not succeed ({})", unhealed.join(", "));
            warn!(%reason, "pipeline blocked");
            state.block(reason)?;
        }
        state.record(COMMAND, unhealed.is_empty());
        self.store.save(&state)?;

        Ok(HealReport {
            stage: state.stage,
            sessions,
        })
    }

    /// Current state, recovering from corruption if needed
    pub fn status(&self) -> LoadedState {
        self.store.load()
    }

    /// Reset the pipeline to `initial` and drop compiled IR. Test files are kept.
    pub fn clean(&self) -> E2eResult<PipelineState> {
        const COMMAND: &str = "clean";
        let current = self.store.load().state;
        if current.stage != Stage::Initial {
            self.begin(COMMAND, Stage::Initial)?;
        }

        if self.paths.ir_dir.exists() {
            std::fs::remove_dir_all(&self.paths.ir_dir)?;
        }
        let mut state = self.store.reset()?;
        state.record(COMMAND, true);
        self.store.save(&state)?;
        info!("pipeline reset");
        Ok(state)
    }
}
