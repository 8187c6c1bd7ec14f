use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cascadeflow_core::{
    ChatMessage, ChunkPhase, ModelConfig, Result, StreamEvent, ToolCall, ToolSpec,
};
use cascadeflow_llm::{LlmChunk, LlmProvider, LlmRequest};
use cascadeflow_quality::{AlignmentAnalysis, AlignmentScorer};
use cascadeflow_telemetry::{CallbackEvent, CallbackManager, CostCalculator};

use crate::domain::{QueryClassification, classify_query};

/// Engine configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub drafter: ModelConfig,
    pub verifier: ModelConfig,
    /// Accept the draft when effective confidence reaches this.
    pub confidence_threshold: f64,
    /// Per-domain overrides of the threshold.
    pub domain_thresholds: HashMap<String, f64>,
    /// Weight of the alignment score when blending with model-reported
    /// confidence (the rest goes to the model signal).
    pub alignment_weight: f64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CascadeConfig {
    pub fn new(drafter: ModelConfig, verifier: ModelConfig) -> Self {
        Self {
            drafter,
            verifier,
            confidence_threshold: 0.70,
            domain_thresholds: HashMap::new(),
            alignment_weight: 0.5,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    fn threshold_for(&self, domain: &str) -> f64 {
        self.domain_thresholds
            .get(domain)
            .copied()
            .unwrap_or(self.confidence_threshold)
    }
}

/// One request through the cascade.
#[derive(Debug, Clone)]
pub struct CascadeRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CascadeRequest {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            tools: vec![],
            max_tokens: None,
            temperature: None,
        }
    }

    fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }
}

/// Final product of a cascade execution.
#[derive(Debug, Clone)]
pub struct CascadeResult {
    pub content: String,
    pub model_used: String,
    pub draft_accepted: bool,
    pub quality_score: f64,
    pub complexity: String,
    pub metadata: Map<String, Value>,
    pub cost: f64,
    pub cost_saved: f64,
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl CascadeResult {
    pub fn to_value(&self) -> Value {
        json!({
            "content": self.content,
            "model_used": self.model_used,
            "draft_accepted": self.draft_accepted,
            "quality_score": self.quality_score,
            "complexity": self.complexity,
            "cost": self.cost,
            "cost_saved": self.cost_saved,
            "total_tokens": self.metadata.get("total_tokens").cloned().unwrap_or(json!(0)),
            "metadata": self.metadata,
            "tool_calls": self.tool_calls,
        })
    }
}

struct Decision {
    accepted: bool,
    effective_confidence: f64,
    threshold: f64,
    analysis: AlignmentAnalysis,
}

/// Drafter → scorer → accept-or-verify state machine.
pub struct CascadeEngine {
    config: CascadeConfig,
    drafter: Arc<dyn LlmProvider>,
    verifier: Arc<dyn LlmProvider>,
    scorer: AlignmentScorer,
    calculator: CostCalculator,
    callbacks: Option<Arc<CallbackManager>>,
}

impl CascadeEngine {
    pub fn new(
        config: CascadeConfig,
        drafter: Arc<dyn LlmProvider>,
        verifier: Arc<dyn LlmProvider>,
    ) -> Self {
        let calculator = CostCalculator::new(config.drafter.clone(), config.verifier.clone());
        Self {
            config,
            drafter,
            verifier,
            scorer: AlignmentScorer::new(),
            calculator,
            callbacks: None,
        }
    }

    /// Attach a callback registry for monitoring hooks.
    pub fn with_callbacks(mut self, callbacks: Arc<CallbackManager>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    fn trigger(&self, event: CallbackEvent, query: &str, data: Map<String, Value>) {
        if let Some(callbacks) = &self.callbacks {
            callbacks.trigger(event, query, data, None);
        }
    }

    pub fn drafter_model(&self) -> &str {
        &self.config.drafter.name
    }

    pub fn verifier_model(&self) -> &str {
        &self.config.verifier.name
    }

    fn llm_request(&self, request: &CascadeRequest, model: &str, stream: bool) -> LlmRequest {
        LlmRequest {
            model: model.to_string(),
            messages: request.messages.clone(),
            system: None,
            tools: request.tools.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: request.temperature.unwrap_or(self.config.temperature),
            stream,
        }
    }

    /// Accept iff effective confidence clears the domain threshold.
    ///
    /// When a scorer fast path fired, its score IS the confidence. Otherwise
    /// blend alignment with the model's own token confidence when present.
    /// Trivial queries with real keyword coverage are always accepted.
    fn decide(
        &self,
        prompt: &str,
        draft_content: &str,
        model_confidence: Option<f64>,
        classification: &QueryClassification,
    ) -> Decision {
        let analysis = self
            .scorer
            .analyze(prompt, draft_content, classification.difficulty);
        let alignment = analysis.alignment_score;

        let effective_confidence = if analysis.fast_path_fired() {
            alignment
        } else {
            match model_confidence {
                Some(confidence) => {
                    let w = self.config.alignment_weight.clamp(0.0, 1.0);
                    w * alignment + (1.0 - w) * confidence
                }
                None => alignment,
            }
        };

        let threshold = self.config.threshold_for(&classification.domain);
        let coverage = analysis
            .features
            .get("keyword_coverage")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let trivial_accept = analysis.is_trivial && coverage >= 0.20;

        let accepted = effective_confidence >= threshold || trivial_accept;

        debug!(
            alignment,
            effective_confidence,
            threshold,
            accepted,
            domain = %classification.domain,
            "cascade decision"
        );

        Decision {
            accepted,
            effective_confidence,
            threshold,
            analysis,
        }
    }

    fn decision_data(&self, decision: &Decision, classification: &QueryClassification) -> Value {
        json!({
            "accepted": decision.accepted,
            "confidence": decision.effective_confidence,
            "quality_score": decision.analysis.alignment_score,
            "threshold": decision.threshold,
            "domain": classification.domain,
            "reasoning": decision.analysis.reasoning,
        })
    }

    fn assemble(
        &self,
        content: String,
        tool_calls: Vec<ToolCall>,
        accepted: bool,
        decision: Option<&Decision>,
        classification: &QueryClassification,
        mut metadata: Map<String, Value>,
        started: Instant,
    ) -> CascadeResult {
        let draft_total = meta_u64(&metadata, "draft_prompt_tokens")
            + meta_u64(&metadata, "draft_completion_tokens");
        let verifier_total = meta_u64(&metadata, "verifier_prompt_tokens")
            + meta_u64(&metadata, "verifier_completion_tokens");
        metadata.insert("draft_total_tokens".into(), json!(draft_total));
        metadata.insert("verifier_total_tokens".into(), json!(verifier_total));
        metadata.insert("total_tokens".into(), json!(draft_total + verifier_total));
        metadata.insert("domain".into(), json!(classification.domain));
        metadata.insert("difficulty".into(), json!(classification.difficulty));
        metadata.insert(
            "cascade_overhead_ms".into(),
            json!(started.elapsed().as_secs_f64() * 1000.0),
        );

        let quality_score = decision.map(|d| d.analysis.alignment_score).unwrap_or(0.0);
        if let Some(decision) = decision {
            metadata.insert("confidence".into(), json!(decision.effective_confidence));
            metadata.insert("threshold".into(), json!(decision.threshold));
            metadata.insert("alignment_reasoning".into(), json!(decision.analysis.reasoning));
        }

        let breakdown = self.calculator.calculate(accepted, &metadata);
        metadata.insert("draft_cost".into(), json!(breakdown.draft_cost));
        metadata.insert("verifier_cost".into(), json!(breakdown.verifier_cost));

        let model_used = if accepted {
            self.config.drafter.name.clone()
        } else {
            self.config.verifier.name.clone()
        };

        CascadeResult {
            content,
            model_used,
            draft_accepted: accepted,
            quality_score,
            complexity: classification.complexity().to_string(),
            metadata,
            cost: breakdown.total_cost,
            cost_saved: breakdown.cost_saved,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        }
    }

    /// Non-streaming execution.
    pub async fn run(&self, request: &CascadeRequest) -> Result<CascadeResult> {
        let started = Instant::now();
        let prompt = request.prompt_text();
        let classification = classify_query(&prompt);
        let mut metadata = Map::new();

        let mut start_data = Map::new();
        start_data.insert("domain".into(), json!(classification.domain));
        start_data.insert("difficulty".into(), json!(classification.difficulty));
        self.trigger(CallbackEvent::QueryStart, &prompt, start_data);

        let draft = match self
            .drafter
            .complete(&self.llm_request(request, &self.config.drafter.name, false))
            .await
        {
            Ok(draft) => Some(draft),
            Err(e) => {
                // Drafter failures degrade to verifier-only.
                warn!(error = %e, "drafter failed, escalating to verifier");
                metadata.insert("drafter_error".into(), json!(e.to_string()));
                None
            }
        };

        let decision = draft.as_ref().map(|draft| {
            metadata.insert("draft_prompt_tokens".into(), json!(draft.usage.input_tokens));
            metadata
                .insert("draft_completion_tokens".into(), json!(draft.usage.output_tokens));
            self.decide(&prompt, &draft.content, draft.confidence, &classification)
        });

        if let Some(decision) = &decision {
            let mut decision_payload = Map::new();
            decision_payload.insert("accepted".into(), json!(decision.accepted));
            decision_payload.insert("confidence".into(), json!(decision.effective_confidence));
            decision_payload.insert("threshold".into(), json!(decision.threshold));
            self.trigger(CallbackEvent::CascadeDecision, &prompt, decision_payload);
        }

        if let (Some(draft), Some(decision)) = (&draft, &decision) {
            if decision.accepted {
                info!(
                    model = %self.config.drafter.name,
                    confidence = decision.effective_confidence,
                    "draft accepted"
                );
                return Ok(self.assemble(
                    draft.content.clone(),
                    draft.tool_calls.clone(),
                    true,
                    Some(decision),
                    &classification,
                    metadata,
                    started,
                ));
            }
        }

        // Rejected (or no draft at all): the verifier answers.
        let verified = self
            .verifier
            .complete(&self.llm_request(request, &self.config.verifier.name, false))
            .await?;
        metadata.insert("verifier_prompt_tokens".into(), json!(verified.usage.input_tokens));
        metadata.insert(
            "verifier_completion_tokens".into(),
            json!(verified.usage.output_tokens),
        );

        Ok(self.assemble(
            verified.content,
            verified.tool_calls,
            false,
            decision.as_ref(),
            &classification,
            metadata,
            started,
        ))
    }

    /// Streaming execution. Events are yielded as soon as they are ready;
    /// draft-phase chunks are emitted before the decision and must be
    /// buffered by the consumer until `DraftDecision` resolves.
    pub fn stream(self: &Arc<Self>, request: CascadeRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(256);
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            engine.stream_inner(request, tx).await;
        });

        rx
    }

    async fn stream_inner(&self, request: CascadeRequest, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();
        let prompt = request.prompt_text();
        let classification = classify_query(&prompt);
        let mut metadata = Map::new();

        let _ = tx
            .send(StreamEvent::Routing {
                data: json!({
                    "strategy": "cascade",
                    "drafter": self.config.drafter.name,
                    "verifier": self.config.verifier.name,
                    "domain": classification.domain,
                    "difficulty": classification.difficulty,
                }),
            })
            .await;

        // ── Draft phase ────────────────────────────────────────
        let mut draft_content = String::new();
        let mut draft_tool_calls: Vec<ToolCall> = Vec::new();
        let mut drafter_failed = false;

        match self
            .drafter
            .stream(&self.llm_request(&request, &self.config.drafter.name, true))
            .await
        {
            Ok(mut chunks) => {
                while let Some(chunk) = chunks.recv().await {
                    match chunk {
                        LlmChunk::TextDelta(text) => {
                            draft_content.push_str(&text);
                            let _ = tx
                                .send(StreamEvent::TextChunk {
                                    content: text,
                                    phase: ChunkPhase::Draft,
                                })
                                .await;
                        }
                        LlmChunk::ToolCall(tc) => draft_tool_calls.push(tc),
                        LlmChunk::Usage(usage) => {
                            metadata.insert(
                                "draft_prompt_tokens".into(),
                                json!(usage.input_tokens),
                            );
                            metadata.insert(
                                "draft_completion_tokens".into(),
                                json!(usage.output_tokens),
                            );
                        }
                        LlmChunk::Done(_) => break,
                        LlmChunk::Error { message, .. } => {
                            warn!(error = %message, "drafter stream failed, escalating");
                            metadata.insert("drafter_error".into(), json!(message));
                            drafter_failed = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "drafter stream failed to start, escalating");
                metadata.insert("drafter_error".into(), json!(e.to_string()));
                drafter_failed = true;
            }
        }

        // ── Decision ───────────────────────────────────────────
        let decision = if drafter_failed {
            None
        } else {
            Some(self.decide(&prompt, &draft_content, None, &classification))
        };

        let accepted = decision.as_ref().map(|d| d.accepted).unwrap_or(false);
        let decision_data = match &decision {
            Some(d) => self.decision_data(d, &classification),
            None => json!({"accepted": false, "reason": "drafter_error"}),
        };
        let _ = tx
            .send(StreamEvent::DraftDecision {
                accepted,
                data: decision_data,
            })
            .await;

        if accepted {
            for tc in &draft_tool_calls {
                let _ = tx
                    .send(StreamEvent::ToolCallComplete { tool_call: tc.clone() })
                    .await;
            }
            let result = self.assemble(
                draft_content,
                draft_tool_calls,
                true,
                decision.as_ref(),
                &classification,
                metadata,
                started,
            );
            let _ = tx
                .send(StreamEvent::Complete {
                    data: json!({"result": result.to_value()}),
                })
                .await;
            return;
        }

        // ── Verifier phase ─────────────────────────────────────
        let _ = tx
            .send(StreamEvent::Switch {
                content: "cascading".into(),
            })
            .await;

        let mut verifier_content = String::new();
        let mut verifier_tool_calls: Vec<ToolCall> = Vec::new();

        match self
            .verifier
            .stream(&self.llm_request(&request, &self.config.verifier.name, true))
            .await
        {
            Ok(mut chunks) => {
                while let Some(chunk) = chunks.recv().await {
                    match chunk {
                        LlmChunk::TextDelta(text) => {
                            verifier_content.push_str(&text);
                            let _ = tx
                                .send(StreamEvent::TextChunk {
                                    content: text,
                                    phase: ChunkPhase::Verifier,
                                })
                                .await;
                        }
                        LlmChunk::ToolCall(tc) => {
                            let _ = tx
                                .send(StreamEvent::ToolCallComplete { tool_call: tc.clone() })
                                .await;
                            verifier_tool_calls.push(tc);
                        }
                        LlmChunk::Usage(usage) => {
                            metadata.insert(
                                "verifier_prompt_tokens".into(),
                                json!(usage.input_tokens),
                            );
                            metadata.insert(
                                "verifier_completion_tokens".into(),
                                json!(usage.output_tokens),
                            );
                        }
                        LlmChunk::Done(_) => break,
                        LlmChunk::Error {
                            message,
                            status_code,
                        } => {
                            // A verifier failure after rejection has no
                            // fallback; the client must see the error.
                            let _ = tx
                                .send(StreamEvent::Error {
                                    message,
                                    status_code,
                                })
                                .await;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                        status_code: e.upstream_status(),
                    })
                    .await;
                return;
            }
        }

        let result = self.assemble(
            verifier_content,
            verifier_tool_calls,
            false,
            decision.as_ref(),
            &classification,
            metadata,
            started,
        );
        let _ = tx
            .send(StreamEvent::Complete {
                data: json!({"result": result.to_value()}),
            })
            .await;
    }
}

fn meta_u64(metadata: &Map<String, Value>, key: &str) -> u64 {
    metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

impl std::fmt::Debug for CascadeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeEngine")
            .field("drafter", &self.config.drafter.name)
            .field("verifier", &self.config.verifier.name)
            .field("threshold", &self.config.confidence_threshold)
            .finish()
    }
}
