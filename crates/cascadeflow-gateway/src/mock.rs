//! Deterministic mock responder.
//!
//! Mock mode answers every request locally so clients can integration-test
//! against the gateway without provider keys. All outputs are pure functions
//! of the input, which keeps client test suites reproducible.

pub const EMBEDDING_DIMS: usize = 384;

/// Deterministic response text: echo of the first 80 prompt characters.
pub fn build_response_text(prompt: &str) -> String {
    let trimmed = prompt.trim();
    let prefix: String = trimmed.chars().take(80).collect();
    format!("Proxy response: {prefix}").trim().to_string()
}

/// Whitespace-word token estimate.
pub fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Simulated cascade decision: prompts that look hard get "escalated".
pub fn decide_draft_acceptance(prompt: &str) -> bool {
    let lowered = prompt.to_lowercase();
    !["hard", "complex", "difficult"]
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Deterministic 384-dim embedding derived from the input text.
///
/// blake3's extendable output gives us as many pseudo-random bytes as we
/// need; each 4-byte window maps to a float in [-1, 1].
pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"cascadeflow-embedding-v1");
    hasher.update(text.as_bytes());
    let mut reader = hasher.finalize_xof();

    let mut bytes = vec![0u8; EMBEDDING_DIMS * 4];
    reader.fill(&mut bytes);

    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            ((raw as f64 / u32::MAX as f64) * 2.0 - 1.0) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_echoes_prompt_prefix() {
        assert_eq!(build_response_text("hi"), "Proxy response: hi");
        let long = "x".repeat(200);
        let text = build_response_text(&long);
        assert_eq!(text.len(), "Proxy response: ".len() + 80);
    }

    #[test]
    fn acceptance_heuristic() {
        assert!(decide_draft_acceptance("What is 2+2?"));
        assert!(!decide_draft_acceptance("Solve this hard problem"));
        assert!(!decide_draft_acceptance("A Complex question"));
    }

    #[test]
    fn embeddings_are_deterministic_and_distinct() {
        let a1 = mock_embedding("hello");
        let a2 = mock_embedding("hello");
        let b = mock_embedding("world");

        assert_eq!(a1.len(), EMBEDDING_DIMS);
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert!(a1.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
