//! Checkers that execute the candidate instead of judging it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::Value;

use super::CheckResult;
use crate::brain::Brain;
use crate::errors::MinionError;
use crate::interpreter::PythonExecutor;
use crate::workers::Input;

const MAX_REPORTED_FAILURES: usize = 5;

/// Runs a suite of test statements against the candidate code; the score is
/// the fraction of passing tests.
pub struct TestMinion;

impl TestMinion {
    pub fn new() -> Self {
        Self
    }

    fn test_cases(input: &Input) -> Vec<String> {
        input
            .metadata
            .get("test_cases")
            .and_then(Value::as_array)
            .map(|cases| {
                cases
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|test| {
                        // humaneval-style suites call the solution `candidate`
                        if input.entry_point.is_empty() {
                            test.to_string()
                        } else {
                            test.replace("candidate", &input.entry_point)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn check(&self, input: &Input) -> Result<CheckResult, MinionError> {
        let tests = Self::test_cases(input);
        if tests.is_empty() {
            return Err(MinionError::Checker("no test cases in metadata".to_string()));
        }

        // fresh executor per suite so candidate state cannot leak between runs
        let mut executor = PythonExecutor::new(Vec::new());
        let setup = executor.run(&input.answer);
        if let Some(error) = setup.error {
            return Ok(CheckResult::failure(format!(
                "Failed to execute solution: {}",
                error
            )));
        }

        let mut passed = 0usize;
        let mut failures = Vec::new();
        for (i, test) in tests.iter().enumerate() {
            let outcome = executor.run(test);
            match outcome.error {
                None => passed += 1,
                Some(error) => {
                    tracing::debug!(test = i + 1, error = %error, "test case failed");
                    if failures.len() < MAX_REPORTED_FAILURES {
                        failures.push(format!("Test failed: {}\n{}", test, error));
                    }
                }
            }
        }

        let score = passed as f64 / tests.len() as f64;
        Ok(CheckResult {
            score,
            correct: passed == tests.len(),
            feedback: if failures.is_empty() {
                "All tests passed!".to_string()
            } else {
                failures.join("\n")
            },
        })
    }
}

impl Default for TestMinion {
    fn default() -> Self {
        Self::new()
    }
}

/// One parsed doctest example.
#[derive(Debug, Clone, PartialEq)]
struct DoctestExample {
    source: String,
    expected: String,
}

/// Parses `>>>` examples from the candidate and runs them.
pub struct DoctestMinion;

impl DoctestMinion {
    pub fn new() -> Self {
        Self
    }

    fn extract_examples(text: &str) -> Vec<DoctestExample> {
        let mut examples = Vec::new();
        let mut current: Option<DoctestExample> = None;
        for raw_line in text.lines() {
            let line = raw_line.trim_start();
            if let Some(source) = line.strip_prefix(">>> ") {
                if let Some(example) = current.take() {
                    examples.push(example);
                }
                current = Some(DoctestExample {
                    source: source.to_string(),
                    expected: String::new(),
                });
            } else if let Some(continuation) = line.strip_prefix("... ") {
                if let Some(example) = &mut current {
                    example.source.push('\n');
                    example.source.push_str(continuation);
                }
            } else if current.is_some() {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('"') {
                    if let Some(example) = current.take() {
                        examples.push(example);
                    }
                } else if let Some(example) = &mut current {
                    if !example.expected.is_empty() {
                        example.expected.push('\n');
                    }
                    example.expected.push_str(trimmed);
                }
            }
        }
        if let Some(example) = current.take() {
            examples.push(example);
        }
        examples
    }

    pub async fn check(&self, input: &Input, brain: &Brain) -> Result<CheckResult, MinionError> {
        let examples = Self::extract_examples(&input.answer);
        if examples.is_empty() {
            // nothing to execute, grade with the critic instead
            return super::CheckMinion::new().check(input, brain).await;
        }

        let mut executor = PythonExecutor::new(Vec::new());
        let setup = executor.run(&input.answer);
        if let Some(error) = setup.error {
            return Ok(CheckResult::failure(format!(
                "Failed to execute solution: {}",
                error
            )));
        }

        let mut passed = 0usize;
        let mut failures = Vec::new();
        for example in &examples {
            let outcome = executor.run(&example.source);
            let actual = match &outcome.error {
                Some(error) => error.clone(),
                None => {
                    let logs = outcome.logs.trim();
                    if logs.is_empty() {
                        outcome.value_text.clone()
                    } else {
                        logs.to_string()
                    }
                }
            };
            if outcome.error.is_none() && outputs_match(&example.expected, &actual) {
                passed += 1;
            } else if failures.len() < MAX_REPORTED_FAILURES {
                failures.push(format!(
                    ">>> {}\nExpected: {}\nGot: {}",
                    example.source, example.expected, actual
                ));
            }
        }

        let score = passed as f64 / examples.len() as f64;
        Ok(CheckResult {
            score,
            correct: passed == examples.len(),
            feedback: if failures.is_empty() {
                "All doctests passed!".to_string()
            } else {
                failures.join("\n\n")
            },
        })
    }
}

impl Default for DoctestMinion {
    fn default() -> Self {
        Self::new()
    }
}

fn outputs_match(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    let actual = actual.trim();
    if expected == actual {
        return true;
    }
    // tolerate str()/repr() differences for string results
    expected.trim_matches('\'') == actual.trim_matches('\'')
}

/// Runs the candidate against held-out (stdin, stdout) pairs.
pub struct CodiumCheckMinion {
    numeric_tolerance: f64,
}

impl CodiumCheckMinion {
    pub fn new(numeric_tolerance: f64) -> Self {
        Self { numeric_tolerance }
    }

    fn io_pairs(input: &Input) -> Vec<(String, String)> {
        let Some(cases) = input.metadata.get("test_cases") else {
            return Vec::new();
        };
        let inputs = cases.get("input").and_then(Value::as_array);
        let outputs = cases.get("output").and_then(Value::as_array);
        match (inputs, outputs) {
            (Some(inputs), Some(outputs)) => inputs
                .iter()
                .zip(outputs.iter())
                .filter_map(|(i, o)| Some((i.as_str()?.to_string(), o.as_str()?.to_string())))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn lines_match(&self, expected: &str, actual: &str) -> bool {
        let expected_lines: Vec<&str> = expected.trim().lines().map(str::trim_end).collect();
        let actual_lines: Vec<&str> = actual.trim().lines().map(str::trim_end).collect();
        if expected_lines.len() != actual_lines.len() {
            return false;
        }
        expected_lines.iter().zip(actual_lines.iter()).all(|(e, a)| {
            if e == a {
                return true;
            }
            // numeric comparison with tolerance
            match (e.trim().parse::<f64>(), a.trim().parse::<f64>()) {
                (Ok(x), Ok(y)) => (x - y).abs() <= self.numeric_tolerance,
                _ => false,
            }
        })
    }

    pub async fn check(&self, input: &Input) -> Result<CheckResult, MinionError> {
        let pairs = Self::io_pairs(input);
        if pairs.is_empty() {
            return Err(MinionError::Checker(
                "no input/output test cases in metadata".to_string(),
            ));
        }

        let mut passed = 0usize;
        let mut first_divergence = None;
        for (i, (stdin, expected)) in pairs.iter().enumerate() {
            // fresh executor per case with its own stdin feed
            let mut executor = PythonExecutor::new(Vec::new());
            let lines: VecDeque<String> = stdin.lines().map(String::from).collect();
            let feed = Rc::new(RefCell::new(lines));
            let feed_for_input = feed.clone();
            executor.add_native(
                "input",
                Rc::new(move |_args| {
                    let line = feed_for_input.borrow_mut().pop_front().unwrap_or_default();
                    Ok(crate::interpreter::value::Value::str(line))
                }),
            );

            let outcome = executor.run(&input.answer);
            let actual = match &outcome.error {
                Some(error) => error.clone(),
                None => outcome.logs.clone(),
            };
            if outcome.error.is_none() && self.lines_match(expected, &actual) {
                passed += 1;
            } else if first_divergence.is_none() {
                first_divergence = Some(format!(
                    "Test {} failed:\nInput: {}\nExpected: {}\nGot: {}",
                    i + 1,
                    stdin,
                    expected,
                    actual.trim()
                ));
            }
        }

        let score = passed as f64 / pairs.len() as f64;
        Ok(CheckResult {
            score,
            correct: passed == pairs.len(),
            feedback: first_divergence.unwrap_or_else(|| "All tests passed!".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_with_candidate(candidate: &str) -> Input {
        let mut input = Input::new("write a function");
        input.answer = candidate.to_string();
        input
    }

    #[tokio::test]
    async fn test_test_minion_scores_pass_fraction() {
        let mut input = input_with_candidate("def add(a, b):\n    return a + b");
        input.entry_point = "add".to_string();
        input.metadata.insert(
            "test_cases".to_string(),
            serde_json::json!([
                "assert candidate(1, 2) == 3",
                "assert candidate(0, 0) == 0",
                "assert candidate(2, 2) == 5",
            ]),
        );
        let result = TestMinion::new().check(&input).await.unwrap();
        assert!((result.score - 2.0 / 3.0).abs() < 1e-9);
        assert!(!result.correct);
        assert!(result.feedback.contains("assert add(2, 2) == 5"));
    }

    #[tokio::test]
    async fn test_test_minion_all_pass() {
        let mut input = input_with_candidate("def double(x):\n    return x * 2");
        input.entry_point = "double".to_string();
        input.metadata.insert(
            "test_cases".to_string(),
            serde_json::json!(["assert candidate(2) == 4"]),
        );
        let result = TestMinion::new().check(&input).await.unwrap();
        assert!(result.correct);
        assert_eq!(result.feedback, "All tests passed!");
    }

    #[tokio::test]
    async fn test_test_minion_broken_solution() {
        let mut input = input_with_candidate("def broken(:\n    pass");
        input.metadata.insert(
            "test_cases".to_string(),
            serde_json::json!(["assert broken() is None"]),
        );
        let result = TestMinion::new().check(&input).await.unwrap();
        assert_eq!(result.score, 0.0);
        assert!(result.feedback.contains("Failed to execute solution"));
    }

    #[test]
    fn test_doctest_extraction() {
        let text = concat!(
            "def add(a, b):\n",
            "    '''Add numbers.\n",
            "    >>> add(2, 3)\n",
            "    5\n",
            "    >>> add(0, 0)\n",
            "    0\n",
            "    '''\n",
            "    return a + b\n",
        );
        let examples = DoctestMinion::extract_examples(text);
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].source, "add(2, 3)");
        assert_eq!(examples[0].expected, "5");
    }

    #[tokio::test]
    async fn test_codium_check_with_stdin() {
        let mut input = input_with_candidate(
            "n = int(input())\nprint(n * 2)",
        );
        input.metadata.insert(
            "test_cases".to_string(),
            serde_json::json!({
                "input": ["3", "10"],
                "output": ["6", "20"],
            }),
        );
        let result = CodiumCheckMinion::new(1e-6).check(&input).await.unwrap();
        assert!(result.correct, "{}", result.feedback);
    }

    #[tokio::test]
    async fn test_codium_reports_first_divergence() {
        let mut input = input_with_candidate("n = int(input())\nprint(n + 1)");
        input.metadata.insert(
            "test_cases".to_string(),
            serde_json::json!({
                "input": ["3", "10"],
                "output": ["6", "11"],
            }),
        );
        let result = CodiumCheckMinion::new(1e-6).check(&input).await.unwrap();
        assert!((result.score - 0.5).abs() < 1e-9);
        assert!(result.feedback.contains("Test 1 failed"));
        assert!(result.feedback.contains("Expected: 6"));
    }

    #[test]
    fn test_numeric_tolerance() {
        let checker = CodiumCheckMinion::new(1e-3);
        assert!(checker.lines_match("0.3333", "0.33329"));
        assert!(!checker.lines_match("0.3333", "0.4"));
    }
}
