//! Pipeline Controller
//!
//! Drives one question through RESOLVE -> SYNTHESIZE -> EXECUTE -> VALIDATE
//! -> FORMAT with bounded retries. Stage failures become `StageOutcome`s and
//! the pure `transition` function decides what happens next; this is the only
//! place an error kind turns into a retry, an escalation, or a failure.

use crate::answer_formatter::AnswerFormatter;
use crate::config::PipelineConfig;
use crate::conversation::ConversationTurn;
use crate::error::PipelineError;
use crate::execution::{ExecutionError, ExecutionGateway, ResultSet, TabularStore};
use crate::execution_loop::error_classifier::ErrorClassifier;
use crate::execution_loop::state_machine::{transition, PipelineState, RetryState, StageOutcome, Transition};
use crate::generation::{ResolutionContext, StructuredGenerator};
use crate::intent::QuerySpecification;
use crate::metadata::DatasetProfile;
use crate::resolver::QueryResolver;
use crate::sql_compiler::{RepairRequest, SqlQuery, SqlSynthesizer};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a question ended
#[derive(Debug, Clone, Serialize)]
pub enum RunOutcome {
    Answered {
        answer: String,
        specification: QuerySpecification,
        sql: String,
        /// `None` when an empty result was accepted as the answer
        result: Option<ResultSet>,
    },
    Failed {
        message: String,
        error: String,
    },
}

/// Outcome of one question plus the states it passed through
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub question: String,
    pub outcome: RunOutcome,
    pub trace: Vec<PipelineState>,
    pub retry: RetryState,
}

impl PipelineRun {
    pub fn is_done(&self) -> bool {
        matches!(self.outcome, RunOutcome::Answered { .. })
    }

    /// Text shown to the user, answer or apology
    pub fn message(&self) -> &str {
        match &self.outcome {
            RunOutcome::Answered { answer, .. } => answer,
            RunOutcome::Failed { message, .. } => message,
        }
    }

    pub fn specification(&self) -> Option<&QuerySpecification> {
        match &self.outcome {
            RunOutcome::Answered { specification, .. } => Some(specification),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Answered { sql, .. } => Some(sql),
            RunOutcome::Failed { .. } => None,
        }
    }

    /// Turn to record in the conversation, only for answered questions
    pub fn to_turn(&self) -> Option<ConversationTurn> {
        match &self.outcome {
            RunOutcome::Answered {
                answer, specification, ..
            } => Some(ConversationTurn::new(self.question.clone(), specification.clone(), answer.clone())),
            RunOutcome::Failed { .. } => None,
        }
    }
}

pub struct PipelineController {
    resolver: QueryResolver,
    synthesizer: SqlSynthesizer,
    gateway: ExecutionGateway,
    formatter: AnswerFormatter,
    classifier: ErrorClassifier,
    max_resolution: u32,
    max_synthesis: u32,
}

impl PipelineController {
    pub fn new(config: &PipelineConfig, generator: Arc<dyn StructuredGenerator>, store: Arc<TabularStore>) -> Self {
        let timeout = config.capability_timeout();
        Self {
            resolver: QueryResolver::new(Arc::clone(&generator), timeout),
            synthesizer: SqlSynthesizer::new(Arc::clone(&generator), timeout),
            gateway: ExecutionGateway::new(store, config.execution_timeout()),
            formatter: AnswerFormatter::new(config.currency_symbol.clone()).with_phrasing(generator, timeout),
            classifier: ErrorClassifier::new(),
            max_resolution: config.max_resolution_attempts,
            max_synthesis: config.max_synthesis_attempts,
        }
    }

    /// Replace the answer formatter, e.g. to skip generator phrasing
    pub fn with_formatter(mut self, formatter: AnswerFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Run one question to DONE or FAILED. Never panics on stage errors and
    /// never exceeds the per-question retry budgets.
    pub async fn run(&self, question: &str, profile: Arc<DatasetProfile>, history: Vec<ConversationTurn>) -> PipelineRun {
        let mut retry = RetryState::new(self.max_resolution, self.max_synthesis);
        let mut state = PipelineState::Resolve;
        let mut trace = Vec::new();

        let mut specification: Option<QuerySpecification> = None;
        let mut query: Option<SqlQuery> = None;
        let mut execution: Option<Result<ResultSet, ExecutionError>> = None;
        let mut result: Option<ResultSet> = None;
        let mut resolve_feedback: Option<String> = None;
        let mut repair: Option<RepairRequest> = None;
        let mut last_error: Option<PipelineError> = None;
        let mut answer: Option<String> = None;
        let mut accepted_empty = false;

        info!("Answering: {}", question);

        while !state.is_terminal() {
            trace.push(state);
            retry.record_entry(state);

            let outcome = match state {
                PipelineState::Resolve => {
                    let context = ResolutionContext {
                        question: question.to_string(),
                        profile: Arc::clone(&profile),
                        history: history.clone(),
                        feedback: resolve_feedback.clone(),
                    };
                    match self.resolver.resolve(&context).await {
                        Ok(spec) => {
                            specification = Some(spec);
                            repair = None;
                            StageOutcome::Resolved
                        }
                        Err(e) => {
                            resolve_feedback = Some(e.to_string());
                            self.fail_stage(e, &mut last_error)
                        }
                    }
                }
                PipelineState::Synthesize => match &specification {
                    Some(spec) => match self.synthesizer.synthesize(spec, &profile, repair.as_ref()).await {
                        Ok(q) => {
                            query = Some(q);
                            StageOutcome::Synthesized
                        }
                        Err(e) => {
                            if let PipelineError::Synthesis { spec_at_fault: true, detail } = &e {
                                resolve_feedback = Some(format!("The specification could not be compiled: {}", detail));
                            }
                            self.fail_stage(e, &mut last_error)
                        }
                    },
                    None => StageOutcome::EngineFault,
                },
                PipelineState::Execute => match &query {
                    Some(q) => {
                        execution = Some(self.gateway.execute(q).await);
                        StageOutcome::Executed
                    }
                    None => StageOutcome::EngineFault,
                },
                PipelineState::Validate => match execution.take() {
                    Some(Ok(rows)) => {
                        result = Some(rows);
                        StageOutcome::ResultReady
                    }
                    Some(Err(e)) => {
                        let previous_sql = query.as_ref().map(|q| q.sql().to_string()).unwrap_or_default();
                        match &e {
                            ExecutionError::Syntax(_) | ExecutionError::Schema(_) => {
                                repair = Some(RepairRequest {
                                    previous_sql,
                                    feedback: e.to_string(),
                                });
                            }
                            ExecutionError::EmptyResult { .. } => {
                                resolve_feedback = Some(format!(
                                    "The query `{}` matched no rows. Check that filter values exist in the data.",
                                    previous_sql
                                ));
                            }
                            ExecutionError::Engine(_) => {}
                        }
                        self.fail_stage(PipelineError::Execution(e), &mut last_error)
                    }
                    None => StageOutcome::EngineFault,
                },
                PipelineState::Format => {
                    let text = match (&specification, &result) {
                        (Some(spec), Some(rows)) if !accepted_empty => {
                            self.formatter.answer(question, spec, rows, &profile).await
                        }
                        (Some(spec), _) => self.formatter.render_empty(spec, &profile),
                        (None, _) => String::new(),
                    };
                    answer = Some(text);
                    StageOutcome::Formatted
                }
                PipelineState::Failed | PipelineState::Done => break,
            };

            let next = transition(state, outcome, &retry);
            if next == Transition::AcceptEmpty {
                accepted_empty = true;
                result = None;
            }
            info!(
                "Transition {} --{:?}--> {} (resolution {}/{}, synthesis {}/{})",
                state,
                outcome,
                next.state(),
                retry.resolution_attempts,
                retry.max_resolution,
                retry.synthesis_attempts,
                retry.max_synthesis
            );
            state = next.state();
        }
        trace.push(state);

        let outcome = match (state, answer, specification, query) {
            (PipelineState::Done, Some(answer), Some(specification), Some(query)) => {
                debug!("Answered with SQL: {}", query.sql());
                RunOutcome::Answered {
                    answer,
                    specification,
                    sql: query.sql().to_string(),
                    result,
                }
            }
            _ => {
                let message = failure_message(last_error.as_ref(), &profile);
                warn!("Question failed: {}", message);
                RunOutcome::Failed {
                    message,
                    error: last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown failure".to_string()),
                }
            }
        };

        PipelineRun {
            question: question.to_string(),
            outcome,
            trace,
            retry,
        }
    }

    fn fail_stage(&self, error: PipelineError, last_error: &mut Option<PipelineError>) -> StageOutcome {
        let outcome = self.classifier.outcome_for(&error);
        debug!("Stage failed with {:?}: {}", outcome, error);
        *last_error = Some(error);
        outcome
    }
}

/// User-visible explanation for a question that reached FAILED
pub fn failure_message(error: Option<&PipelineError>, profile: &DatasetProfile) -> String {
    match error {
        Some(PipelineError::UnresolvableIntent { concept, .. }) => {
            let labels: Vec<String> = profile.columns.iter().map(|c| c.label()).collect();
            format!(
                "Sorry, I couldn't find anything in this dataset matching \"{}\". The data covers: {}.",
                concept,
                labels.join(", ")
            )
        }
        Some(PipelineError::Synthesis { .. }) => {
            "Sorry, I understood the question but couldn't build a valid query for it. Try rephrasing it.".to_string()
        }
        Some(PipelineError::Execution(ExecutionError::Engine(detail))) => {
            format!("Sorry, the analysis engine failed while answering ({}). Please try again.", detail)
        }
        Some(PipelineError::Execution(_)) => {
            "Sorry, I couldn't produce a query the data engine accepts for that question.".to_string()
        }
        _ => "Sorry, I couldn't answer that question.".to_string(),
    }
}
