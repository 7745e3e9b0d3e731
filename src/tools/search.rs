//! Search strategies over tool metadata.
//!
//! Keyword search is the always-available baseline; regex compiles the query
//! as a pattern; BM25 ranks over a tokenized index of name, description, and
//! category and falls back to keyword when the index yields nothing.

use std::collections::HashMap;
use std::str::FromStr;

use super::ToolInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    #[default]
    Keyword,
    Regex,
    Bm25,
}

impl FromStr for SearchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyword" => Ok(SearchStrategy::Keyword),
            "regex" => Ok(SearchStrategy::Regex),
            "bm25" => Ok(SearchStrategy::Bm25),
            other => Err(format!("unknown search strategy: {}", other)),
        }
    }
}

/// Search `tools` for `query`, returning up to `top_k` matches ranked by
/// score; ties are broken by name ascending.
pub fn search_tools(
    query: &str,
    tools: &[ToolInfo],
    strategy: SearchStrategy,
    top_k: usize,
    category: Option<&str>,
) -> Vec<ToolInfo> {
    let filtered: Vec<&ToolInfo> = tools
        .iter()
        .filter(|t| category.map(|c| t.category == c).unwrap_or(true))
        .collect();

    let mut scored: Vec<(f64, &ToolInfo)> = match strategy {
        SearchStrategy::Keyword => keyword_scores(query, &filtered),
        SearchStrategy::Regex => regex_scores(query, &filtered),
        SearchStrategy::Bm25 => {
            let scores = bm25_scores(query, &filtered);
            if scores.is_empty() {
                keyword_scores(query, &filtered)
            } else {
                scores
            }
        }
    };

    scored.sort_by(|(sa, ta), (sb, tb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ta.name.cmp(&tb.name))
    });
    scored.into_iter().take(top_k).map(|(_, t)| t.clone()).collect()
}

fn keyword_scores<'a>(query: &str, tools: &[&'a ToolInfo]) -> Vec<(f64, &'a ToolInfo)> {
    let keywords: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
    if keywords.is_empty() {
        return Vec::new();
    }
    let mut results = Vec::new();
    for tool in tools {
        let name = tool.name.to_lowercase();
        let description = tool.description.to_lowercase();
        let mut score = 0.0;
        for kw in &keywords {
            // name matches are weighted higher than description matches
            if name.contains(kw.as_str()) {
                score += 2.0;
            }
            if description.contains(kw.as_str()) {
                score += 1.0;
            }
        }
        if score > 0.0 {
            results.push((score, *tool));
        }
    }
    results
}

fn regex_scores<'a>(query: &str, tools: &[&'a ToolInfo]) -> Vec<(f64, &'a ToolInfo)> {
    let Ok(re) = regex::Regex::new(query) else {
        tracing::warn!(pattern = %query, "invalid regex pattern, no matches");
        return Vec::new();
    };
    tools
        .iter()
        .filter(|t| re.is_match(&t.name) || re.is_match(&t.description))
        .map(|t| (1.0, *t))
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn bm25_scores<'a>(query: &str, tools: &[&'a ToolInfo]) -> Vec<(f64, &'a ToolInfo)> {
    const K1: f64 = 1.5;
    const B: f64 = 0.75;

    let docs: Vec<Vec<String>> = tools
        .iter()
        .map(|t| tokenize(&format!("{} {} {}", t.name, t.description, t.category)))
        .collect();
    let n = docs.len();
    if n == 0 {
        return Vec::new();
    }
    let avg_len = docs.iter().map(|d| d.len()).sum::<usize>() as f64 / n as f64;
    if avg_len == 0.0 {
        return Vec::new();
    }

    // document frequency per query term
    let query_terms = tokenize(query);
    let mut df: HashMap<&str, usize> = HashMap::new();
    for term in &query_terms {
        let count = docs.iter().filter(|d| d.iter().any(|t| t == term)).count();
        df.insert(term.as_str(), count);
    }

    let mut results = Vec::new();
    for (doc, tool) in docs.iter().zip(tools.iter()) {
        let mut score = 0.0;
        for term in &query_terms {
            let tf = doc.iter().filter(|t| *t == term).count() as f64;
            if tf == 0.0 {
                continue;
            }
            let dfi = df[term.as_str()] as f64;
            let idf = (((n as f64 - dfi + 0.5) / (dfi + 0.5)) + 1.0).ln();
            score += idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * doc.len() as f64 / avg_len));
        }
        if score > 0.0 {
            results.push((score, *tool));
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, description: &str, category: &str) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            description: description.to_string(),
            parameters: vec![],
            category: category.to_string(),
        }
    }

    fn sample() -> Vec<ToolInfo> {
        vec![
            info("github.create_pull_request", "Create a pull request on a repository", "github"),
            info("slack.send_message", "Send a message to a Slack channel", "slack"),
            info("jira.create_ticket", "Create an issue ticket in Jira", "jira"),
        ]
    }

    #[test]
    fn test_keyword_matches_substring_case_insensitive() {
        let tools = sample();
        let results = search_tools("Pull Request", &tools, SearchStrategy::Keyword, 5, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "github.create_pull_request");
    }

    #[test]
    fn test_keyword_name_weighted_above_description() {
        let tools = vec![
            info("notify", "send a message somewhere", ""),
            info("message_sender", "notify people", ""),
        ];
        let results = search_tools("message", &tools, SearchStrategy::Keyword, 5, None);
        assert_eq!(results[0].name, "message_sender");
    }

    #[test]
    fn test_keyword_no_match_returns_empty() {
        let tools = sample();
        let results = search_tools("database", &tools, SearchStrategy::Keyword, 5, None);
        assert!(results.is_empty());
    }

    #[test]
    fn test_regex_strategy() {
        let tools = sample();
        let results = search_tools(r"create_\w+", &tools, SearchStrategy::Regex, 5, None);
        assert_eq!(results.len(), 2);
        // equal scores break ties by name ascending
        assert_eq!(results[0].name, "github.create_pull_request");
        assert_eq!(results[1].name, "jira.create_ticket");
    }

    #[test]
    fn test_bm25_ranks_matching_doc_first() {
        let tools = sample();
        let results = search_tools("pull request", &tools, SearchStrategy::Bm25, 5, None);
        assert!(!results.is_empty());
        assert_eq!(results[0].name, "github.create_pull_request");
    }

    #[test]
    fn test_category_filter() {
        let tools = sample();
        let results = search_tools("create", &tools, SearchStrategy::Keyword, 5, Some("jira"));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "jira.create_ticket");
    }

    #[test]
    fn test_top_k_limits_results() {
        let tools = sample();
        let results = search_tools("create", &tools, SearchStrategy::Keyword, 1, None);
        assert_eq!(results.len(), 1);
    }
}
