//! Answer and code extraction from assistant text.

use regex::Regex;

/// Literal end-of-code sentinel used by the code worker.
pub const END_CODE_TOKEN: &str = "<end_code>";

/// Post-processing applied to a worker's raw answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostProcessing {
    #[default]
    None,
    ExtractNumber,
    ExtractMathAnswer,
    ExtractPython,
}

impl PostProcessing {
    pub fn apply(&self, raw: &str) -> String {
        match self {
            PostProcessing::None => raw.to_string(),
            PostProcessing::ExtractNumber => extract_number(raw).unwrap_or_else(|| raw.to_string()),
            PostProcessing::ExtractMathAnswer => extract_final_answer(raw),
            PostProcessing::ExtractPython => {
                extract_code_block(raw).unwrap_or_else(|| raw.to_string())
            }
        }
    }
}

impl std::str::FromStr for PostProcessing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(PostProcessing::None),
            "extract_number" | "extract_number_from_string" => Ok(PostProcessing::ExtractNumber),
            "extract_math_answer" => Ok(PostProcessing::ExtractMathAnswer),
            "extract_python" => Ok(PostProcessing::ExtractPython),
            other => Err(format!("unknown post-processing: {}", other)),
        }
    }
}

/// Split reasoning-tag output into (think content, answer content).
///
/// Models in think mode wrap their reasoning in `<think>...</think>`; the
/// answer is whatever follows.
pub fn split_think(text: &str) -> (Option<String>, String) {
    let re = Regex::new(r"(?s)<think>(.*?)</think>").unwrap();
    match re.captures(text) {
        Some(caps) => {
            let think = caps.get(1).map(|m| m.as_str().trim().to_string());
            let answer = re.replace(text, "").trim().to_string();
            (think, answer)
        }
        None => (None, text.to_string()),
    }
}

/// Extract the first complete fenced code block, recognizing in priority
/// order: a plain ```python fence, a fence followed by the end-of-code
/// sentinel, and a loose sentinel-terminated block.
pub fn extract_code_block(text: &str) -> Option<String> {
    let patterns = [
        // ```python ... ```
        r"(?s)```(?:python|py)\s*\n(.*?)\n?```",
        // ```python ... ```<end_code>
        r"(?s)```(?:python|py)?\s*\n(.*?)\n?```\s*<end_code>",
        // ```python ... <end_code>
        r"(?s)```(?:python|py)?\s*\n(.*?)<end_code>",
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures(text) {
            let code = caps.get(1)?.as_str().trim_end();
            // the plain-fence pattern can capture a sentinel-terminated block
            // with a dangling fence; strip any stray backticks
            let code = code.trim_end_matches('`').trim_end();
            if !code.is_empty() {
                return Some(code.to_string());
            }
        }
    }
    // bare fence with no language tag
    let re = Regex::new(r"(?s)```\s*\n(.*?)\n?```").unwrap();
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end().to_string())
        .filter(|code| !code.is_empty())
}

/// Extract the final answer line from chain-of-thought output; falls back to
/// the last non-empty paragraph.
pub fn extract_final_answer(text: &str) -> String {
    let re = Regex::new(r"(?im)^\s*(?:final answer|answer)\s*[:：]\s*(.+)\s*$").unwrap();
    if let Some(caps) = re.captures_iter(text).last() {
        if let Some(m) = caps.get(1) {
            return m.as_str().trim().to_string();
        }
    }
    text.split("\n\n")
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Extract the last number in the text (handles separators and decimals).
pub fn extract_number(text: &str) -> Option<String> {
    let re = Regex::new(r"-?\d[\d,]*(?:\.\d+)?").unwrap();
    re.find_iter(text)
        .last()
        .map(|m| m.as_str().replace(',', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_fenced_block() {
        let text = "Thought: compute it.\n```python\nresult = 234 * 568\nfinal_answer(result)\n```\ndone";
        let code = extract_code_block(text).unwrap();
        assert_eq!(code, "result = 234 * 568\nfinal_answer(result)");
    }

    #[test]
    fn test_extract_block_with_sentinel() {
        let text = "```python\nx = 1\n```<end_code>";
        assert_eq!(extract_code_block(text).unwrap(), "x = 1");
    }

    #[test]
    fn test_extract_loose_sentinel_block() {
        let text = "```python\nx = 2\n<end_code>";
        assert_eq!(extract_code_block(text).unwrap(), "x = 2");
    }

    #[test]
    fn test_first_complete_block_wins() {
        let text = "```python\nfirst = 1\n```\nand then\n```python\nsecond = 2\n```";
        assert_eq!(extract_code_block(text).unwrap(), "first = 1");
    }

    #[test]
    fn test_no_block_returns_none() {
        assert!(extract_code_block("no code here").is_none());
    }

    #[test]
    fn test_split_think() {
        let (think, answer) = split_think("<think>working it out</think>The answer is 4.");
        assert_eq!(think.as_deref(), Some("working it out"));
        assert_eq!(answer, "The answer is 4.");

        let (think, answer) = split_think("plain answer");
        assert!(think.is_none());
        assert_eq!(answer, "plain answer");
    }

    #[test]
    fn test_extract_final_answer_labeled() {
        let text = "Step 1: think.\nStep 2: more.\nFinal answer: 42";
        assert_eq!(extract_final_answer(text), "42");
    }

    #[test]
    fn test_extract_final_answer_fallback_last_paragraph() {
        let text = "Reasoning here.\n\nThe result is seven.";
        assert_eq!(extract_final_answer(text), "The result is seven.");
    }

    #[test]
    fn test_extract_number() {
        assert_eq!(extract_number("the total is 1,234.5 units").unwrap(), "1234.5");
        assert_eq!(extract_number("answer: -7").unwrap(), "-7");
        assert!(extract_number("no digits").is_none());
    }
}
