use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

const BASELINE_STANDARD: f64 = 0.20;
const BASELINE_TRIVIAL: f64 = 0.25;
const OFF_TOPIC_CAP: f64 = 0.15;

const MCQ_SCORE: f64 = 0.75;
const CLASSIFICATION_SCORE: f64 = 0.72;
const LONG_CONTEXT_SCORE: f64 = 0.72;
const FUNCTION_CALL_SCORE: f64 = 0.72;
const ROLEPLAY_SCORE: f64 = 0.70;
const EXTRACTION_SCORE: f64 = 0.70;
const MULTI_TURN_SCORE: f64 = 0.72;

static CHOICE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b[A-D][.)]\s").unwrap());
static MCQ_LETTER_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-D][.)\s]").unwrap());
static MCQ_ANSWER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:the\s+)?answer\s+is\s+[a-d]",
        r"(?:i\s+)?(?:believe|think)\s+(?:the\s+)?answer\s+is\s+[a-d]",
        r"(?:i\s+)?(?:would\s+)?(?:choose|select|pick)\s+[a-d]",
        r"^[a-d]\s*[.):]",
        r"correct\s+answer\s+is\s+[a-d]",
        r"option\s+[a-d]",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static CLASSIFICATION_STRUCTURED: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"intent:\s*\w+",
        r"category:\s*\w+",
        r"label:\s*\w+",
        r"classification:\s*\w+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static CLASSIFICATION_NATURAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:the\s+)?intent\s+is\s+\w+",
        r"(?:the\s+)?category\s+is\s+\w+",
        r"(?:i\s+)?(?:classify|categorize)\s+(?:this\s+)?as\s+\w+",
        r"this\s+(?:is|falls\s+under)\s+(?:the\s+)?\w+\s+(?:intent|category)",
        r"belongs\s+to\s+(?:the\s+)?\w+\s+(?:intent|category)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static PLAIN_TEXT_TOOL_LISTING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^- \w+:").unwrap());
static EQUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\s*[+\-*/]\s*\d+\s*=\s*\d+").unwrap());
static EQUALS_RESULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"=\s*\$?\d+").unwrap());
static NUMBERED_LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s").unwrap());
static BULLET_LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-•*]\s").unwrap());
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w+\-]").unwrap());

/// Detailed alignment analysis with diagnostic features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentAnalysis {
    pub alignment_score: f64,
    pub features: Map<String, Value>,
    pub reasoning: String,
    pub is_trivial: bool,
    pub baseline_used: f64,
}

impl AlignmentAnalysis {
    /// True when a format fast path produced this score. The engine treats
    /// fast-path scores as the effective confidence directly.
    pub fn fast_path_fired(&self) -> bool {
        self.features
            .iter()
            .any(|(k, v)| k.ends_with("_boost") && k != "trivial_boost" && v == &json!(true))
    }
}

/// Production-calibrated multi-signal alignment scorer.
///
/// Pure and deterministic: the same `(query, response, difficulty)` always
/// produces the same score, which is what makes cross-implementation parity
/// testing possible.
pub struct AlignmentScorer {
    stopwords: HashSet<&'static str>,
    abbreviations: HashSet<&'static str>,
    synonyms: HashMap<&'static str, Vec<&'static str>>,
}

impl Default for AlignmentScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl AlignmentScorer {
    pub fn new() -> Self {
        let stopwords: HashSet<&'static str> = [
            "the", "is", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of",
            "with", "by", "from", "as", "what", "how", "why", "when", "where", "who", "which",
            "do", "does", "did", "can", "could", "would", "should",
        ]
        .into_iter()
        .collect();

        let abbreviations: HashSet<&'static str> = [
            "ai", "ml", "nlp", "llm", "gpt", "api", "sql", "nosql", "aws", "gcp", "azure", "cpu",
            "gpu", "ram", "ssd", "hdd", "html", "css", "js", "xml", "json", "yaml", "csv", "http",
            "https", "tcp", "udp", "ip", "dns", "ssh", "ftp", "url", "uri", "urn", "ui", "ux",
            "db", "ci", "cd", "ide", "sdk", "jdk", "npm", "pip", "git", "svn", "ios", "macos",
            "os", "vm", "vps", "cdn", "ssl", "tls", "orm", "mvc", "mvvm", "pdf", "rtf", "docx",
            "xlsx", "ner", "pos", "ocr", "cv", "dl", "rl", "gan",
        ]
        .into_iter()
        .collect();

        let mut synonyms: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        synonyms.insert("python", vec!["py", "programming language"]);
        synonyms.insert("javascript", vec!["js", "ecmascript", "script"]);
        synonyms.insert("compare", vec!["comparison", "versus", "vs", "difference", "differ"]);
        synonyms.insert("api", vec!["interface", "endpoint", "application programming interface"]);
        synonyms.insert("algorithm", vec!["algo", "method", "approach", "procedure"]);
        synonyms.insert("function", vec!["func", "method", "routine"]);
        synonyms.insert("database", vec!["db", "data store", "storage"]);
        synonyms.insert("implement", vec!["implementation", "build", "create", "develop"]);

        Self {
            stopwords,
            abbreviations,
            synonyms,
        }
    }

    /// Scalar alignment score in [0, 1].
    pub fn score(&self, query: &str, response: &str, query_difficulty: f64) -> f64 {
        self.analyze(query, response, query_difficulty).alignment_score
    }

    /// Full analysis with diagnostic features and human-readable reasoning.
    pub fn analyze(&self, query: &str, response: &str, query_difficulty: f64) -> AlignmentAnalysis {
        if query.is_empty() || response.is_empty() {
            return AlignmentAnalysis {
                alignment_score: 0.0,
                features: Map::new(),
                reasoning: "Empty query or response".to_string(),
                is_trivial: false,
                baseline_used: 0.0,
            };
        }

        let mut features = Map::new();
        let query_lower = query.to_lowercase();
        let query_lower = query_lower.trim();
        let response_lower = response.to_lowercase();
        let response_lower = response_lower.trim();

        // Format fast paths, in order; first match wins.
        let is_mcq = self.is_mcq_format(query);
        let valid_mcq = is_mcq && self.is_valid_mcq_response(response);
        features.insert("is_mcq".into(), json!(is_mcq));
        features.insert("valid_mcq_response".into(), json!(valid_mcq));
        if is_mcq && valid_mcq {
            // Single-letter answers are expected here; the MCQ format counts
            // as trivial.
            features.insert("is_trivial".into(), json!(true));
            features.insert("baseline".into(), json!(BASELINE_TRIVIAL));
            features.insert("mcq_boost".into(), json!(true));
            return AlignmentAnalysis {
                alignment_score: MCQ_SCORE,
                features,
                reasoning: format!("Score {MCQ_SCORE:.3}: MCQ format with valid letter answer"),
                is_trivial: true,
                baseline_used: BASELINE_TRIVIAL,
            };
        }

        let is_classification = self.is_intent_classification_format(query_lower);
        let valid_classification =
            is_classification && self.is_valid_classification_response(response_lower);
        features.insert("is_classification".into(), json!(is_classification));
        features.insert("valid_classification_response".into(), json!(valid_classification));
        if is_classification && valid_classification {
            features.insert("is_trivial".into(), json!(true));
            features.insert("baseline".into(), json!(BASELINE_TRIVIAL));
            features.insert("classification_boost".into(), json!(true));
            return AlignmentAnalysis {
                alignment_score: CLASSIFICATION_SCORE,
                features,
                reasoning: format!(
                    "Score {CLASSIFICATION_SCORE:.3}: Classification format with valid intent answer"
                ),
                is_trivial: true,
                baseline_used: BASELINE_TRIVIAL,
            };
        }

        let is_long_context = self.is_long_context_qa_format(query, query_lower);
        let valid_long_context =
            is_long_context && self.is_valid_long_context_response(response);
        features.insert("is_long_context_qa".into(), json!(is_long_context));
        features.insert("valid_long_context_response".into(), json!(valid_long_context));
        if is_long_context && valid_long_context {
            features.insert("is_trivial".into(), json!(false));
            features.insert("baseline".into(), json!(BASELINE_STANDARD));
            features.insert("long_context_qa_boost".into(), json!(true));
            return AlignmentAnalysis {
                alignment_score: LONG_CONTEXT_SCORE,
                features,
                reasoning: format!(
                    "Score {LONG_CONTEXT_SCORE:.3}: Long context QA format with valid answer"
                ),
                is_trivial: false,
                baseline_used: BASELINE_STANDARD,
            };
        }

        let is_function_call = self.is_function_call_format(query_lower);
        let valid_function_call =
            is_function_call && self.is_valid_function_call_response(response, response_lower);
        features.insert("is_function_call".into(), json!(is_function_call));
        features.insert("valid_function_call_response".into(), json!(valid_function_call));
        if is_function_call && valid_function_call {
            features.insert("is_trivial".into(), json!(false));
            features.insert("baseline".into(), json!(BASELINE_STANDARD));
            features.insert("function_call_boost".into(), json!(true));
            return AlignmentAnalysis {
                alignment_score: FUNCTION_CALL_SCORE,
                features,
                reasoning: format!(
                    "Score {FUNCTION_CALL_SCORE:.3}: Function call format with valid tool response"
                ),
                is_trivial: false,
                baseline_used: BASELINE_STANDARD,
            };
        }

        let is_roleplay = self.is_roleplay_format(query_lower);
        let valid_roleplay = is_roleplay && self.is_valid_roleplay_response(response_lower);
        features.insert("is_roleplay".into(), json!(is_roleplay));
        features.insert("valid_roleplay_response".into(), json!(valid_roleplay));
        if is_roleplay && valid_roleplay {
            features.insert("is_trivial".into(), json!(false));
            features.insert("baseline".into(), json!(BASELINE_STANDARD));
            features.insert("roleplay_boost".into(), json!(true));
            return AlignmentAnalysis {
                alignment_score: ROLEPLAY_SCORE,
                features,
                reasoning: format!(
                    "Score {ROLEPLAY_SCORE:.3}: Roleplay format with valid persona response"
                ),
                is_trivial: false,
                baseline_used: BASELINE_STANDARD,
            };
        }

        let is_extraction = self.is_extraction_format(query_lower);
        let valid_extraction = is_extraction && self.is_valid_extraction_response(response);
        features.insert("is_extraction".into(), json!(is_extraction));
        features.insert("valid_extraction_response".into(), json!(valid_extraction));
        if is_extraction && valid_extraction {
            features.insert("is_trivial".into(), json!(false));
            features.insert("baseline".into(), json!(BASELINE_STANDARD));
            features.insert("extraction_boost".into(), json!(true));
            return AlignmentAnalysis {
                alignment_score: EXTRACTION_SCORE,
                features,
                reasoning: format!(
                    "Score {EXTRACTION_SCORE:.3}: Extraction format with valid structured response"
                ),
                is_trivial: false,
                baseline_used: BASELINE_STANDARD,
            };
        }

        let is_multi_turn = self.is_multi_turn_format(query_lower);
        let valid_multi_turn = is_multi_turn && self.is_valid_multi_turn_response(response);
        features.insert("is_multi_turn".into(), json!(is_multi_turn));
        features.insert("valid_multi_turn_response".into(), json!(valid_multi_turn));
        if is_multi_turn && valid_multi_turn {
            // Multi-turn responses only answer the current turn, so keyword
            // overlap with the full history is meaningless.
            features.insert("is_trivial".into(), json!(false));
            features.insert("baseline".into(), json!(BASELINE_STANDARD));
            features.insert("multi_turn_boost".into(), json!(true));
            return AlignmentAnalysis {
                alignment_score: MULTI_TURN_SCORE,
                features,
                reasoning: format!(
                    "Score {MULTI_TURN_SCORE:.3}: Multi-turn conversation format with valid response"
                ),
                is_trivial: false,
                baseline_used: BASELINE_STANDARD,
            };
        }

        // General additive path.
        let is_trivial = self.is_trivial_query(&query_lower, response_lower);
        features.insert("is_trivial".into(), json!(is_trivial));

        let baseline_used = if is_trivial { BASELINE_TRIVIAL } else { BASELINE_STANDARD };
        let mut score = baseline_used;
        features.insert("baseline".into(), json!(baseline_used));

        let (coverage_score, has_keywords) =
            self.analyze_keyword_coverage(query_lower, response_lower);
        features.insert("keyword_coverage".into(), json!(coverage_score));
        score += coverage_score;

        let importance_score = self.analyze_important_words(query, response_lower);
        features.insert("important_coverage".into(), json!(importance_score));
        score += importance_score;

        let length_score =
            self.analyze_length_appropriateness(query_difficulty, response_lower, is_trivial);
        features.insert("length_appropriateness".into(), json!(length_score));
        score += length_score;

        let directness_score = self.analyze_directness(response_lower, query_difficulty);
        features.insert("directness".into(), json!(directness_score));
        score += directness_score;

        let depth_score = self.analyze_explanation_depth(response_lower, query_difficulty);
        features.insert("explanation_depth".into(), json!(depth_score));
        score += depth_score;

        let pattern_score = self.detect_answer_pattern(query_lower, response_lower);
        features.insert("answer_pattern".into(), json!(pattern_score));
        score += pattern_score;

        let reasoning_score = self.detect_reasoning_chain(response, response_lower);
        features.insert("reasoning_chain".into(), json!(reasoning_score));
        score += reasoning_score;

        // Off-topic penalty only when the response shares no keywords with a
        // multi-word query. Short valid answers keep their keywords credit.
        if !has_keywords && query_lower.split_whitespace().count() > 2 {
            score = (score * 0.60).min(OFF_TOPIC_CAP);
            features.insert("off_topic_penalty".into(), json!(true));
        }

        if is_trivial && has_keywords && coverage_score > 0.0 {
            score *= 1.15;
            features.insert("trivial_boost".into(), json!(true));
        }

        let final_score = score.clamp(0.0, 1.0);
        let reasoning = generate_reasoning(&features, final_score);

        AlignmentAnalysis {
            alignment_score: final_score,
            features,
            reasoning,
            is_trivial,
            baseline_used,
        }
    }

    // ── Keyword extraction ─────────────────────────────────────

    fn extract_keywords(&self, text: &str) -> HashSet<String> {
        let mut keywords = HashSet::new();

        for word in text.to_lowercase().split_whitespace() {
            let clean = word.trim_matches(|c: char| ".,!?;:\"'()[]{}".contains(c));
            if clean.is_empty() || self.stopwords.contains(clean) {
                continue;
            }
            // Anything containing a digit stays: 4, 42, 2+2, 3.14, v1.0.
            if clean.chars().any(|c| c.is_ascii_digit()) {
                keywords.insert(clean.to_string());
                continue;
            }
            // Common technical abbreviations stay even when short.
            if self.abbreviations.contains(clean) {
                keywords.insert(clean.to_string());
                continue;
            }
            if clean.chars().count() > 2 {
                keywords.insert(clean.to_string());
            }
        }

        keywords
    }

    fn is_trivial_query(&self, query_lower: &str, response: &str) -> bool {
        let response_len = response.split_whitespace().count();
        let query_len = query_lower.split_whitespace().count();

        if response_len <= 3 && query_len <= 10 {
            const TRIVIAL_PATTERNS: &[&str] = &[
                "what is", "who is", "when", "where", "how many", "how much", "which",
                "calculate", "compute", "equals", "sum", "add", "subtract", "multiply",
                "divide", "capital", "color", "colour",
            ];
            return TRIVIAL_PATTERNS.iter().any(|p| query_lower.contains(p));
        }

        false
    }

    // ── F1: multiple choice ────────────────────────────────────

    fn is_mcq_format(&self, query: &str) -> bool {
        let query_lower = query.to_lowercase();

        const MCQ_INSTRUCTIONS: &[&str] = &[
            "multiple-choice question",
            "multiple choice question",
            "answer the following question",
            "select the correct answer",
            "choose the correct answer",
            "which of the following",
            "pick the best answer",
        ];
        let has_instruction = MCQ_INSTRUCTIONS.iter().any(|p| query_lower.contains(p));

        let has_choices = CHOICE_MARKER.find_iter(query).count() >= 2;

        let trimmed = query_lower.trim();
        let has_answer_prompt = trimmed.ends_with("answer:") || trimmed.ends_with("answer");

        (has_instruction && has_choices) || (has_choices && has_answer_prompt)
    }

    fn is_valid_mcq_response(&self, response: &str) -> bool {
        let stripped = response.trim().to_uppercase();

        if matches!(stripped.as_str(), "A" | "B" | "C" | "D") {
            return true;
        }
        if MCQ_LETTER_PREFIX.is_match(&stripped) {
            return true;
        }

        let response_lower = response.to_lowercase();
        MCQ_ANSWER_PATTERNS.iter().any(|re| re.is_match(&response_lower))
    }

    // ── F2: intent classification ──────────────────────────────

    fn is_intent_classification_format(&self, query_lower: &str) -> bool {
        const INSTRUCTIONS: &[&str] = &[
            "classify this",
            "classify the",
            "categorize this",
            "categorize the",
            "identify the intent",
            "determine the intent",
            "what is the intent",
            "which intent",
            "which category",
            "label this",
        ];
        let has_instruction = INSTRUCTIONS.iter().any(|p| query_lower.contains(p));

        const LIST_MARKERS: &[&str] = &[
            "available intents:",
            "available categories:",
            "intent labels:",
            "category labels:",
            "possible intents:",
            "possible categories:",
            "choose from:",
            "one of the following:",
            "into one of",
        ];
        let has_list = LIST_MARKERS.iter().any(|p| query_lower.contains(p));

        const OUTPUT_FORMAT_MARKERS: &[&str] = &[
            "intent:",
            "category:",
            "label:",
            "format your response",
            "output the exact intent",
            "output the exact category",
        ];
        let has_output_format = OUTPUT_FORMAT_MARKERS.iter().any(|p| query_lower.contains(p));

        has_instruction && (has_list || has_output_format)
    }

    fn is_valid_classification_response(&self, response_lower: &str) -> bool {
        CLASSIFICATION_STRUCTURED.iter().any(|re| re.is_match(response_lower))
            || CLASSIFICATION_NATURAL.iter().any(|re| re.is_match(response_lower))
    }

    // ── F3: long-context QA ────────────────────────────────────

    fn is_long_context_qa_format(&self, query: &str, query_lower: &str) -> bool {
        if query.split_whitespace().count() < 300 {
            return false;
        }

        const QA_MARKERS: &[&str] = &[
            "question:",
            "based on the",
            "according to the",
            "from the text",
            "from the passage",
            "from the document",
            "from the article",
            "in the text",
            "in the passage",
            "answer the following",
            "answer this question",
            "what does the",
            "what is the",
            "who is",
            "who was",
            "when did",
            "where did",
            "how did",
            "why did",
            "summarize",
            "extract",
        ];
        let has_qa_marker = QA_MARKERS.iter().any(|p| query_lower.contains(p));

        const FUNCTION_MARKERS: &[&str] = &[
            "function",
            "functions:",
            "api",
            "call the",
            "invoke",
            "parameters",
            "arguments",
            "{\"name\":",
            "\"type\":",
            "\"description\":",
        ];
        let has_function_marker = FUNCTION_MARKERS.iter().any(|p| query_lower.contains(p));

        const CODE_CONTEXT_MARKERS: &[&str] = &[
            "```", "def ", "class ", "import ", "function ", "const ", "let ", "var ",
        ];
        let has_code_context = CODE_CONTEXT_MARKERS.iter().any(|p| query.contains(p));

        has_qa_marker || has_function_marker || has_code_context
    }

    fn is_valid_long_context_response(&self, response: &str) -> bool {
        let stripped = response.trim();
        let response_lower = stripped.to_lowercase();
        let word_count = stripped.split_whitespace().count();

        if word_count == 0 {
            return false;
        }

        // Reading-comprehension answers are often one or two words; accept
        // them when they look like real tokens rather than garbage.
        if word_count <= 2 {
            let collapsed: String = stripped
                .chars()
                .filter(|c| *c != ' ' && *c != '-' && *c != '_')
                .collect();
            if !collapsed.is_empty() && collapsed.chars().all(|c| c.is_alphanumeric()) {
                return true;
            }
            return matches!(
                response_lower.as_str(),
                "yes" | "no" | "true" | "false" | "none" | "unknown" | "n/a"
            );
        }

        const FUNCTION_CALL_PATTERNS: &[&str] = &[
            "{\"name\":",
            "```json",
            "```python",
            "{\"function\":",
            "{\"tool\":",
            "def ",
            "function(",
        ];
        if FUNCTION_CALL_PATTERNS.iter().any(|p| response.contains(p)) {
            return true;
        }

        const ANSWER_PATTERNS: &[&str] = &[
            "the answer is",
            "according to",
            "based on",
            "the text states",
            "the passage mentions",
            "it says that",
            "the document indicates",
            "in summary",
            "to summarize",
        ];
        if ANSWER_PATTERNS.iter().any(|p| response_lower.contains(p)) {
            return true;
        }

        if word_count >= 5 {
            // All-caps walls of text are a spam signature.
            if stripped.chars().count() > 20 && is_uppercase_text(stripped) {
                return false;
            }
            let real_words = stripped
                .split_whitespace()
                .filter(|w| w.chars().count() > 1 && w.chars().all(|c| c.is_alphabetic()))
                .count();
            if real_words >= 3 {
                return true;
            }
        }

        false
    }

    // ── F4: function call / tool use ───────────────────────────

    fn is_function_call_format(&self, query_lower: &str) -> bool {
        const FUNCTION_MARKERS: &[&str] = &[
            "function",
            "functions:",
            "tool",
            "tools:",
            "api",
            "call the",
            "invoke",
            "execute the",
        ];
        let has_function_marker = FUNCTION_MARKERS.iter().any(|p| query_lower.contains(p));
        if !has_function_marker {
            return false;
        }

        const SCHEMA_PATTERNS: &[&str] = &[
            "\"name\":",
            "\"parameters\":",
            "\"properties\":",
            "\"type\":",
            "\"description\":",
            "```json",
        ];
        let has_schema = SCHEMA_PATTERNS.iter().any(|p| query_lower.contains(p));

        let has_plain_text_tools = PLAIN_TEXT_TOOL_LISTING.is_match(query_lower)
            || query_lower.contains("access to the following tools")
            || query_lower.contains("available tools:")
            || query_lower.contains("you have access to");

        const INSTRUCTION_PATTERNS: &[&str] = &[
            "call the function",
            "use the tool",
            "invoke the function",
            "execute the function",
            "make a function call",
            "generate a function call",
            "return a function call",
            "output a function call",
            "should be used",
            "which tool",
            "determine which tool",
            "select the appropriate",
            "choose the right tool",
            "respond with",
            "if a tool should",
        ];
        let has_instruction = INSTRUCTION_PATTERNS.iter().any(|p| query_lower.contains(p));

        const OUTPUT_FORMAT_PATTERNS: &[&str] = &["tool:", "parameters:", "tool_name:", "arguments:"];
        let format_marker_count = OUTPUT_FORMAT_PATTERNS
            .iter()
            .filter(|p| query_lower.contains(*p))
            .count();
        let has_output_format = format_marker_count >= 2;

        has_schema || has_instruction || has_plain_text_tools || has_output_format
    }

    fn is_valid_function_call_response(&self, response: &str, response_lower: &str) -> bool {
        // "No tool needed" answers are a legitimate response to tool prompts.
        const NO_TOOL_PATTERNS: &[&str] = &[
            "no tool is needed",
            "no tool needed",
            "no tool is required",
            "no tool required",
            "doesn't require a tool",
            "does not require a tool",
            "doesn't require any tool",
            "does not require any tool",
            "none of the tools",
            "none of the available tools",
            "no function is needed",
            "no function needed",
            "no function call",
            "no api call",
            "without using any tool",
            "without any tool",
            "can be answered directly",
            "can be answered without",
            "don't need to use",
            "do not need to use",
            "not necessary to use",
            "not necessary to call",
            "no need to call",
            "no need to use",
        ];
        if NO_TOOL_PATTERNS.iter().any(|p| response_lower.contains(p)) {
            return true;
        }

        const JSON_PATTERNS: &[&str] = &[
            "{\"name\":",
            "{\"function\":",
            "{\"tool\":",
            "\"name\":",
            "\"function_call\":",
            "\"tool_call\":",
        ];
        if JSON_PATTERNS.iter().any(|p| response.contains(p)) {
            return true;
        }

        if response.contains("```") && (response.contains('(') || response.contains('{')) {
            return true;
        }

        const STRUCTURED_PATTERNS: &[&str] = &["function:", "tool:", "call:"];
        if STRUCTURED_PATTERNS.iter().any(|p| response_lower.contains(p)) {
            return true;
        }

        const NATURAL_TOOL_PATTERNS: &[&str] = &[
            "i would use",
            "i will use",
            "i'll use",
            "use the",
            "using the",
            "call the",
            "calling the",
            "invoke the",
            "invoking the",
            "recommend using",
            "should use",
            "we can use",
            "we should use",
            "you can use",
            "appropriate tool",
            "correct tool",
            "right tool",
            "best tool",
        ];
        if NATURAL_TOOL_PATTERNS.iter().any(|p| response_lower.contains(p)) {
            return true;
        }

        const COMMON_FUNCTION_NAMES: &[&str] = &[
            "get_weather",
            "calculate",
            "search",
            "create_event",
            "send_email",
            "query_database",
            "get_current_weather",
            "send_message",
            "get_stock_price",
            "book_flight",
            "set_reminder",
            "add_task",
        ];
        if COMMON_FUNCTION_NAMES.iter().any(|p| response_lower.contains(p)) {
            return true;
        }

        const PARAM_PATTERNS: &[&str] = &[
            "parameters:",
            "arguments:",
            "with parameters",
            "with arguments",
            "with the following",
            "\"location\"",
            "\"query\"",
            "\"expression\"",
            "\"title\"",
            "\"to\"",
            "\"subject\"",
        ];
        PARAM_PATTERNS.iter().any(|p| response_lower.contains(p))
    }

    // ── F5: roleplay / persona ─────────────────────────────────

    fn is_roleplay_format(&self, query_lower: &str) -> bool {
        const ROLEPLAY_MARKERS: &[&str] = &[
            "act as",
            "acting as",
            "pretend you are",
            "pretend to be",
            "you are a",
            "you are an",
            "roleplay as",
            "role play as",
            "speak as",
            "respond as",
            "answer as",
            "write as",
            "imagine you are",
            "assume the role",
            "take on the role",
            "in the style of",
            "like a",
            "as if you were",
            "behave like",
            "impersonate",
        ];
        ROLEPLAY_MARKERS.iter().any(|p| query_lower.contains(p))
    }

    fn is_valid_roleplay_response(&self, response_lower: &str) -> bool {
        if response_lower.split_whitespace().count() < 5 {
            return false;
        }

        // Refusals break character and should not be accepted as drafts.
        const REFUSAL_PATTERNS: &[&str] = &[
            "i cannot",
            "i can't",
            "i'm not able",
            "as an ai",
            "as a language model",
            "i don't have the ability",
        ];
        !REFUSAL_PATTERNS.iter().any(|p| response_lower.contains(p))
    }

    // ── F6: extraction ─────────────────────────────────────────

    fn is_extraction_format(&self, query_lower: &str) -> bool {
        const EXTRACTION_MARKERS: &[&str] = &[
            "extract",
            "list all",
            "find all",
            "identify all",
            "get all",
            "pull out",
            "gather all",
            "collect all",
            "enumerate",
            "what are all",
            "name all",
            "provide a list",
            "give me a list",
            "output a list",
        ];
        EXTRACTION_MARKERS.iter().any(|p| query_lower.contains(p))
    }

    fn is_valid_extraction_response(&self, response: &str) -> bool {
        let stripped = response.trim();
        let word_count = stripped.split_whitespace().count();

        if word_count < 3 {
            return false;
        }

        if stripped.starts_with('[') || response.contains("[\"") {
            return true;
        }

        if response.contains(',') && word_count >= 3 {
            return true;
        }

        const LIST_MARKERS: &[&str] = &[
            "- ", "* ", "• ", "1.", "2.", "1)", "2)", "\n-", "\n*", "\n•", "\n1", "\n2",
        ];
        LIST_MARKERS.iter().any(|p| response.contains(p))
    }

    // ── F7: multi-turn conversation ────────────────────────────

    fn is_multi_turn_format(&self, query_lower: &str) -> bool {
        const CONVERSATION_MARKERS: &[&str] = &[
            "previous conversation:",
            "previous conversation\n",
            "conversation history:",
            "conversation so far:",
            "prior context:",
            "chat history:",
            "dialogue history:",
            "earlier in the conversation:",
        ];
        let has_conversation_marker = CONVERSATION_MARKERS.iter().any(|p| query_lower.contains(p));

        const TURN_MARKERS: &[&str] =
            &["turn 1:", "turn 2:", "[turn 1]", "[turn 2]", "turn 1\n", "turn 2\n"];
        let has_turn_marker = TURN_MARKERS.iter().any(|p| query_lower.contains(p));

        const USER_ASSISTANT_PAIRS: &[(&str, &str)] = &[
            ("user:", "assistant:"),
            ("human:", "assistant:"),
            ("human:", "ai:"),
            ("user:", "ai:"),
            ("question:", "answer:"),
            ("q:", "a:"),
        ];
        let has_user_assistant = USER_ASSISTANT_PAIRS
            .iter()
            .any(|(u, a)| query_lower.contains(u) && query_lower.contains(a));

        const CURRENT_TURN_MARKERS: &[&str] = &[
            "current turn:",
            "current question:",
            "now answer:",
            "now respond:",
            "your turn:",
        ];
        let has_current_turn = CURRENT_TURN_MARKERS.iter().any(|p| query_lower.contains(p));

        has_conversation_marker || has_turn_marker || (has_user_assistant && has_current_turn)
    }

    fn is_valid_multi_turn_response(&self, response: &str) -> bool {
        let stripped = response.trim();
        if stripped.split_whitespace().count() < 3 {
            return false;
        }

        const GARBAGE_PATTERNS: &[&str] = &[
            "lorem ipsum",
            "asdf",
            "qwerty",
            "null null null",
            "undefined undefined",
        ];
        let response_lower = stripped.to_lowercase();
        !GARBAGE_PATTERNS.iter().any(|p| response_lower.contains(p))
    }

    // ── Additive signals ───────────────────────────────────────

    fn analyze_keyword_coverage(&self, query_lower: &str, response_lower: &str) -> (f64, bool) {
        let query_words = self.extract_keywords(query_lower);
        let response_words = self.extract_keywords(response_lower);

        if query_words.is_empty() {
            return (0.0, true);
        }

        let mut matches = 0.0f64;
        for word in &query_words {
            if response_words.contains(word) || response_lower.contains(word.as_str()) {
                matches += 1.0;
            } else if let Some(syns) = self.synonyms.get(word.as_str()) {
                if syns.iter().any(|syn| response_lower.contains(syn)) {
                    matches += 0.8;
                }
            }
        }

        // Short responses with any valid keyword are acceptable answers
        // ("4" for "2+2") — give at least partial credit.
        let response_word_count = response_lower.split_whitespace().count();
        if response_word_count <= 3 && !response_words.is_empty() {
            matches = matches.max(0.5);
        }

        let coverage_ratio = matches / query_words.len() as f64;
        let has_keywords =
            matches > 0.0 || (!response_words.is_empty() && response_word_count <= 3);

        if coverage_ratio >= 0.7 {
            (0.30, true)
        } else if coverage_ratio >= 0.5 {
            (0.20, true)
        } else if coverage_ratio >= 0.3 {
            (0.10, true)
        } else if coverage_ratio >= 0.1 {
            (0.00, has_keywords)
        } else if has_keywords {
            (0.00, true)
        } else {
            (-0.10, false)
        }
    }

    fn analyze_important_words(&self, query: &str, response_lower: &str) -> f64 {
        const QUESTION_STARTERS: &[&str] = &[
            "What", "How", "When", "Where", "Who", "Why", "Which", "Can", "Could", "Should",
            "Would",
        ];

        let mut important: Vec<String> = Vec::new();
        for word in query.split_whitespace() {
            let starts_upper = word.chars().next().is_some_and(|c| c.is_uppercase());
            if starts_upper && !QUESTION_STARTERS.contains(&word) {
                important.push(word.to_lowercase());
            } else if word.chars().count() > 8 {
                important.push(word.to_lowercase());
            } else if word.chars().any(|c| c.is_ascii_digit()) {
                important.push(NON_WORD.replace_all(&word.to_lowercase(), "").to_string());
            }
        }

        if important.is_empty() {
            return 0.0;
        }

        let covered = important
            .iter()
            .filter(|w| !w.is_empty() && response_lower.contains(w.as_str()))
            .count();
        let ratio = covered as f64 / important.len() as f64;

        if ratio >= 0.7 {
            0.10
        } else if ratio >= 0.5 {
            0.07
        } else if ratio >= 0.3 {
            0.05
        } else if ratio > 0.0 {
            0.02
        } else {
            0.0
        }
    }

    fn analyze_length_appropriateness(
        &self,
        query_difficulty: f64,
        response_lower: &str,
        is_trivial: bool,
    ) -> f64 {
        let response_length = response_lower.chars().count();

        if is_trivial {
            return if response_length <= 10 {
                0.20
            } else if response_length <= 30 {
                0.15
            } else if response_length <= 50 {
                0.10
            } else {
                0.05
            };
        }

        let (expected_min, expected_max, optimal_min, optimal_max) = if query_difficulty < 0.3 {
            (5, 100, 10, 50)
        } else if query_difficulty < 0.5 {
            (20, 250, 40, 150)
        } else if query_difficulty < 0.7 {
            (50, 500, 100, 300)
        } else {
            (100, 800, 150, 500)
        };

        if (optimal_min..=optimal_max).contains(&response_length) {
            return 0.20;
        }
        if (expected_min..=expected_max).contains(&response_length) {
            return 0.10;
        }
        if response_length < expected_min {
            let ratio = response_length as f64 / expected_min as f64;
            return if ratio < 0.3 {
                -0.15
            } else if ratio < 0.6 {
                -0.10
            } else {
                -0.05
            };
        }
        if response_length as f64 > expected_max as f64 * 1.5 {
            return -0.05;
        }

        0.05
    }

    fn analyze_directness(&self, response_lower: &str, query_difficulty: f64) -> f64 {
        // Directness only matters for easy queries; hard ones deserve buildup.
        if query_difficulty >= 0.5 {
            return 0.0;
        }

        let first_sentence = response_lower.split('.').next().unwrap_or("").trim();
        let len = first_sentence.chars().count();

        if len < 40 {
            0.15
        } else if len < 80 {
            0.10
        } else if len < 150 {
            0.05
        } else {
            0.0
        }
    }

    fn analyze_explanation_depth(&self, response_lower: &str, query_difficulty: f64) -> f64 {
        if query_difficulty < 0.6 {
            return 0.0;
        }

        const EXPLANATION_MARKERS: &[&str] = &[
            "because",
            "therefore",
            "thus",
            "however",
            "although",
            "for example",
            "for instance",
            "specifically",
            "in other words",
            "that is",
            "namely",
            "moreover",
            "furthermore",
            "additionally",
            "consequently",
            "as a result",
            "this means",
            "in fact",
            "nevertheless",
            "nonetheless",
            "accordingly",
            "hence",
        ];

        let marker_count = EXPLANATION_MARKERS
            .iter()
            .filter(|m| response_lower.contains(*m))
            .count();

        match marker_count {
            n if n >= 4 => 0.20,
            3 => 0.15,
            2 => 0.10,
            1 => 0.05,
            _ => 0.0,
        }
    }

    fn detect_answer_pattern(&self, query_lower: &str, response_lower: &str) -> f64 {
        let mut score = 0.0f64;

        if query_lower.starts_with("what is") || query_lower.starts_with("what are") {
            if ["is", "are", "refers to", "means", "defined as"]
                .iter()
                .any(|w| response_lower.contains(w))
            {
                score += 0.08;
            }
        } else if query_lower.starts_with("how") || query_lower.contains("how to") {
            if ["first", "then", "steps", "process", "can", "by", "using"]
                .iter()
                .any(|w| response_lower.contains(w))
            {
                score += 0.08;
            }
        } else if query_lower.starts_with("why") {
            if ["because", "due to", "reason", "since", "as", "causes"]
                .iter()
                .any(|w| response_lower.contains(w))
            {
                score += 0.08;
            }
        } else if query_lower.starts_with("when") {
            if ["in", "during", "year", "time", "date"]
                .iter()
                .any(|w| response_lower.contains(w))
            {
                score += 0.08;
            }
        } else if (query_lower.contains("compare") || query_lower.contains("difference"))
            && ["while", "whereas", "but", "however", "unlike", "different"]
                .iter()
                .any(|w| response_lower.contains(w))
        {
            score += 0.08;
        }

        if ["i don't know", "i'm not sure", "unclear", "uncertain"]
            .iter()
            .any(|p| response_lower.contains(p))
        {
            score -= 0.05;
        }

        score.max(0.0)
    }

    fn detect_reasoning_chain(&self, response: &str, response_lower: &str) -> f64 {
        // Short responses cannot carry a meaningful reasoning chain.
        if response.chars().count() < 100 {
            return 0.0;
        }

        let mut structural_score = 0.0f64;

        // Shown work: equations with results.
        let equation_count = EQUATION.find_iter(response).count();
        let equals_count = EQUALS_RESULT.find_iter(response).count();
        if equation_count >= 3 || equals_count >= 3 {
            structural_score += 0.15;
        } else if equation_count >= 2 || equals_count >= 2 {
            structural_score += 0.10;
        }

        const STEP_INDICATORS: &[&str] = &[
            "first,",
            "then,",
            "next,",
            "finally,",
            "step 1",
            "step 2",
            "second,",
            "third,",
            "after that,",
            "let's calculate",
            "let's find",
            "let's solve",
            "to begin,",
            "initially,",
            "lastly,",
        ];
        let step_count = STEP_INDICATORS
            .iter()
            .filter(|p| response_lower.contains(*p))
            .count();
        if step_count >= 3 {
            structural_score += 0.12;
        } else if step_count >= 2 {
            structural_score += 0.08;
        }

        const CONCLUSION_MARKERS: &[&str] = &[
            "therefore,",
            "thus,",
            "hence,",
            "the answer is",
            "the final answer",
            "####",
            "in total,",
            "altogether,",
            "in conclusion,",
            "to summarize,",
            "the result is",
            "this gives us",
            "we conclude",
        ];
        let conclusion_count = CONCLUSION_MARKERS
            .iter()
            .filter(|p| response_lower.contains(*p))
            .count();
        if conclusion_count >= 2 {
            structural_score += 0.08;
        } else if conclusion_count >= 1 {
            structural_score += 0.04;
        }

        let numbered = NUMBERED_LIST_ITEM.find_iter(response).count();
        let bullets = BULLET_LIST_ITEM.find_iter(response).count();
        if numbered >= 3 || bullets >= 3 {
            structural_score += 0.08;
        }

        let has_code_block = response.contains("```");
        const CODE_EXPLANATION: &[&str] =
            &["this code", "the function", "this function", "here's how", "this will"];
        if has_code_block && CODE_EXPLANATION.iter().any(|p| response_lower.contains(p)) {
            structural_score += 0.10;
        }

        // Domain keywords alone are not reasoning; structural evidence is
        // required before any bonus applies.
        if structural_score < 0.08 {
            return 0.0;
        }

        let mut domain_bonus = 0.0f64;

        const MATH_MARKERS: &[&str] = &["calculate", "compute", "solve", "equation", "formula"];
        if MATH_MARKERS.iter().filter(|m| response_lower.contains(*m)).count() >= 2 {
            domain_bonus += 0.03;
        }

        const ANALYSIS_MARKERS: &[&str] = &[
            "on one hand",
            "on the other hand",
            "in contrast",
            "compared to",
            "whereas",
            "advantage",
            "disadvantage",
        ];
        if ANALYSIS_MARKERS.iter().filter(|m| response_lower.contains(*m)).count() >= 2 {
            domain_bonus += 0.03;
        }

        const SCIENCE_MARKERS: &[&str] =
            &["hypothesis", "experiment", "methodology", "conclusion", "findings"];
        if SCIENCE_MARKERS.iter().filter(|m| response_lower.contains(*m)).count() >= 3 {
            domain_bonus += 0.03;
        }

        (structural_score + domain_bonus).min(0.25)
    }
}

/// Python-style `str.isupper`: at least one cased char, none lowercase.
fn is_uppercase_text(s: &str) -> bool {
    s.chars().any(|c| c.is_alphabetic()) && !s.chars().any(|c| c.is_lowercase())
}

fn generate_reasoning(features: &Map<String, Value>, final_score: f64) -> String {
    let mut reasons: Vec<&str> = Vec::new();
    let flag = |key: &str| features.get(key) == Some(&json!(true));
    let num = |key: &str| features.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);

    if flag("is_trivial") {
        reasons.push("trivial query");
    }
    if flag("trivial_boost") {
        reasons.push("factual answer boost (+15%)");
    }
    if flag("off_topic_penalty") {
        reasons.push("OFF-TOPIC (capped)");
    }

    let coverage = num("keyword_coverage");
    if coverage > 0.20 {
        reasons.push("excellent coverage");
    } else if coverage > 0.10 {
        reasons.push("good coverage");
    } else if coverage < 0.0 {
        reasons.push("poor coverage");
    }

    if num("important_coverage") > 0.07 {
        reasons.push("key terms present");
    }

    let length = num("length_appropriateness");
    if length > 0.15 {
        reasons.push("optimal length");
    } else if length > 0.05 {
        reasons.push("appropriate length");
    } else if length < -0.05 {
        reasons.push("length mismatch");
    }

    if num("directness") > 0.10 {
        reasons.push("direct answer");
    }
    if num("explanation_depth") > 0.10 {
        reasons.push("good depth");
    }
    if num("answer_pattern") > 0.05 {
        reasons.push("matches question type");
    }
    if num("reasoning_chain") > 0.10 {
        reasons.push("chain-of-thought reasoning detected");
    }

    if reasons.is_empty() {
        reasons.push("standard alignment");
    }

    let baseline = features.get("baseline").and_then(|v| v.as_f64()).unwrap_or(0.20);
    format!(
        "Score {final_score:.3} (baseline={baseline:.2}): {}",
        reasons.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> AlignmentScorer {
        AlignmentScorer::new()
    }

    // ── Fast paths ─────────────────────────────────────────────

    #[test]
    fn mcq_format_with_letter_answer() {
        let query =
            "Answer the following multiple-choice question: What is 2+2? A) 3 B) 4 C) 5 D) 6";
        let analysis = scorer().analyze(query, "B", 0.3);
        assert_eq!(analysis.alignment_score, 0.75);
        assert!(analysis.is_trivial);
        assert_eq!(analysis.baseline_used, 0.25);
        assert_eq!(analysis.features["is_mcq"], json!(true));
        assert_eq!(analysis.features["valid_mcq_response"], json!(true));
    }

    #[test]
    fn mcq_accepts_natural_language_answers() {
        let query = "Which of the following is a prime? A) 4 B) 6 C) 7 D) 9\nAnswer:";
        let s = scorer();
        assert_eq!(s.score(query, "The answer is C", 0.3), 0.75);
        assert_eq!(s.score(query, "I believe the answer is C because it has no divisors", 0.3), 0.75);
        assert_eq!(s.score(query, "Option C", 0.3), 0.75);
    }

    #[test]
    fn mcq_rejects_non_answer() {
        let query =
            "Answer the following multiple-choice question: What is 2+2? A) 3 B) 4 C) 5 D) 6";
        let analysis = scorer().analyze(query, "I enjoy turtles", 0.3);
        assert!(analysis.alignment_score < 0.75);
        assert_eq!(analysis.features["valid_mcq_response"], json!(false));
    }

    #[test]
    fn classification_format_parity_case() {
        let query = "Classify the intent. Available intents: billing, tech_support. \
                     Output the exact intent in the format 'Intent: <intent>'.";
        let score = scorer().score(query, "Intent: billing", 0.3);
        assert!((score - 0.72).abs() <= 0.05);
    }

    #[test]
    fn long_context_parity_case() {
        let context = "word ".repeat(310);
        let query = format!("{context}\nQuestion: Based on the document, is the answer YES or NO?");
        let score = scorer().score(&query, "YES", 0.6);
        assert!((score - 0.72).abs() <= 0.05);
    }

    #[test]
    fn long_context_rejects_empty_garbage() {
        let context = "word ".repeat(310);
        let query = format!("{context}\nQuestion: Based on the document, who won?");
        let s = scorer();
        assert!(s.score(&query, "???", 0.6) < 0.5);
    }

    #[test]
    fn function_call_parity_case() {
        let query = "You have access to the following tools:\n\
                     - get_weather: Returns weather for a city.\n\
                     Call the function when needed. Respond with Tool and Parameters.";
        let response = "Tool: get_weather\nParameters: {\"location\": \"Paris\"}";
        let score = scorer().score(query, response, 0.5);
        assert!((score - 0.72).abs() <= 0.05);
    }

    #[test]
    fn function_call_accepts_no_tool_needed() {
        let query = "You have access to the following tools:\n- calculate: math.\n\
                     Determine which tool should be used.";
        let score = scorer().score(query, "No tool is needed, this can be answered directly.", 0.5);
        assert!((score - 0.72).abs() <= 0.05);
    }

    #[test]
    fn roleplay_format_scores_fixed() {
        let analysis = scorer().analyze(
            "Act as a grumpy medieval innkeeper greeting a traveler.",
            "Hmph. Another muddy traveler tracking dirt across my floors. The stew costs two coppers.",
            0.5,
        );
        assert_eq!(analysis.alignment_score, 0.70);
        assert_eq!(analysis.features["roleplay_boost"], json!(true));
    }

    #[test]
    fn roleplay_refusal_is_not_valid() {
        let analysis = scorer().analyze(
            "Act as a pirate captain.",
            "As an AI language model, I cannot pretend to be a pirate.",
            0.5,
        );
        assert_ne!(analysis.alignment_score, 0.70);
        assert_eq!(analysis.features["valid_roleplay_response"], json!(false));
    }

    #[test]
    fn extraction_format_with_list() {
        let analysis = scorer().analyze(
            "Extract all city names from the text.",
            "- Paris\n- Berlin\n- Madrid",
            0.4,
        );
        assert_eq!(analysis.alignment_score, 0.70);
        assert_eq!(analysis.features["extraction_boost"], json!(true));
    }

    #[test]
    fn multi_turn_format_scores_fixed() {
        let query = "Previous conversation:\nUser: What's the capital of France?\n\
                     Assistant: Paris.\nCurrent turn: How many people live there?";
        let analysis = scorer().analyze(query, "About 2.1 million people live in Paris proper.", 0.4);
        assert_eq!(analysis.alignment_score, 0.72);
        assert_eq!(analysis.features["multi_turn_boost"], json!(true));
    }

    #[test]
    fn multi_turn_garbage_rejected() {
        let query = "Conversation history:\nUser: hi\nAssistant: hello";
        let analysis = scorer().analyze(query, "null null null", 0.4);
        assert_ne!(analysis.alignment_score, 0.72);
    }

    // ── General path ───────────────────────────────────────────

    #[test]
    fn short_factual_answer_is_not_off_topic() {
        let analysis = scorer().analyze("What is 2+2?", "4", 0.3);
        assert!(analysis.alignment_score >= 0.65, "got {}", analysis.alignment_score);
        assert!(analysis.is_trivial);
        assert!(analysis.features.get("off_topic_penalty").is_none());
    }

    #[test]
    fn on_topic_beats_off_topic() {
        let s = scorer();
        let on = s.score("What color is the sky?", "The sky is blue.", 0.3);
        let off = s.score("What color is the sky?", "Pasta is made from wheat.", 0.3);
        assert!(on > off, "on={on} off={off}");
        assert!(on >= 0.45, "got {on}");
    }

    #[test]
    fn abbreviation_queries_keep_keywords() {
        let score = scorer().score("What is AI?", "Artificial Intelligence", 0.3);
        assert!(score >= 0.5, "got {score}");
    }

    #[test]
    fn off_topic_response_is_capped() {
        let analysis = scorer().analyze(
            "Explain the difference between TCP and UDP protocols",
            "Bananas are yellow fruit enjoyed worldwide",
            0.5,
        );
        assert!(analysis.alignment_score <= 0.15, "got {}", analysis.alignment_score);
        assert_eq!(analysis.features["off_topic_penalty"], json!(true));
    }

    #[test]
    fn reasoning_chain_boosts_cot_responses() {
        let s = scorer();
        let response = "First, we calculate the base: 12 * 3 = 36. Then, we add the offset: \
                        36 + 4 = 40. Finally, we divide: 40 / 2 = 20. Therefore, the answer is 20.";
        let boost = s.detect_reasoning_chain(response, &response.to_lowercase());
        assert!(boost >= 0.15, "got {boost}");

        // Domain keywords without structure earn nothing.
        let flat = "This involves a formula and an equation to solve but here is a plain \
                    unstructured paragraph that simply talks about the problem at length.";
        assert_eq!(s.detect_reasoning_chain(flat, &flat.to_lowercase()), 0.0);
    }

    #[test]
    fn explanation_depth_only_for_hard_queries() {
        let s = scorer();
        let response = "because of this, therefore that, for example x, moreover y";
        assert!(s.analyze_explanation_depth(response, 0.7) >= 0.15);
        assert_eq!(s.analyze_explanation_depth(response, 0.4), 0.0);
    }

    #[test]
    fn scores_clamp_to_unit_interval() {
        let s = scorer();
        for (q, r, d) in [
            ("What is 2+2?", "4", 0.1),
            ("Explain quantum entanglement in detail", "no", 0.9),
            ("hi", "hello there how are you today my friend", 0.5),
        ] {
            let score = s.score(q, r, d);
            assert!((0.0..=1.0).contains(&score), "{q} -> {score}");
        }
    }

    #[test]
    fn empty_inputs_score_zero() {
        let s = scorer();
        assert_eq!(s.score("", "response", 0.5), 0.0);
        assert_eq!(s.score("query", "", 0.5), 0.0);
    }

    #[test]
    fn determinism() {
        let s = scorer();
        let q = "How do I implement a binary search in Python?";
        let r = "First, sort the list. Then compare the midpoint and recurse on the half \
                 that can contain the target.";
        let a = s.score(q, r, 0.5);
        let b = s.score(q, r, 0.5);
        assert_eq!(a, b);
    }

    #[test]
    fn fast_path_flag_is_exposed() {
        let query =
            "Answer the following multiple-choice question: What is 2+2? A) 3 B) 4 C) 5 D) 6";
        let analysis = scorer().analyze(query, "B", 0.3);
        assert!(analysis.fast_path_fired());

        let plain = scorer().analyze("What color is the sky?", "The sky is blue.", 0.3);
        assert!(!plain.fast_path_fired());
    }
}
