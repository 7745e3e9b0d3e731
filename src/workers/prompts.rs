//! Prompt construction for the worker strategies.

use crate::workers::extract::END_CODE_TOKEN;
use crate::workers::Input;

pub const COT_INSTRUCTION: &str =
    "Let's think step by step to solve this problem. Explain each part of your reasoning, \
     then state the final answer on its own line prefixed with 'Final answer:'.";

pub const DCOT_INSTRUCTION: &str = "Solve the problem below. First decide how much reasoning it \
     needs: answer simple questions directly, and reason step by step through hard ones. \
     Always end with a line 'Final answer: <answer>'.";

/// Render the shared worker prompt from an input: query, constraints, and
/// any pending feedback from a failed check.
pub fn worker_prompt(input: &Input) -> String {
    let mut prompt = String::new();
    if !input.query_type.is_empty() {
        prompt.push_str(&format!("Task type: {}\n", input.query_type));
    }
    prompt.push_str(&format!("Task:\n{}\n", input.query_text()));
    if !input.symbols.is_empty() {
        prompt.push_str("\nResults from earlier steps:\n");
        let mut keys: Vec<&String> = input.symbols.keys().collect();
        keys.sort();
        for key in keys {
            prompt.push_str(&format!("- {}: {}\n", key, input.symbols[key]));
        }
    }
    if !input.feedback.is_empty() {
        prompt.push_str(&format!(
            "\nYour previous answer was judged insufficient. Feedback:\n{}\n\nPrevious answer:\n{}\n",
            input.feedback, input.answer
        ));
    }
    prompt
}

/// Prompt for the python worker: produce one code block solving the task.
pub fn python_prompt(input: &Input, previous_error: &str) -> String {
    let mut prompt = format!(
        "Write Python code to solve the task below. Put all of the code in a single \
         ```python fenced block. Use print() to show intermediate values and call \
         final_answer(result) with the final result.\n\n{}",
        worker_prompt(input)
    );
    if !previous_error.is_empty() {
        prompt.push_str(&format!(
            "\nYour previous attempt failed. Fix the code according to this error:\n{}\n",
            previous_error
        ));
    }
    prompt
}

/// System prompt for the Thought -> Code -> Observation cycle.
pub fn code_agent_system_prompt(tool_lines: &[String]) -> String {
    let tools_section = if tool_lines.is_empty() {
        "No tools are available beyond the Python environment.".to_string()
    } else {
        format!("Available tools, callable as Python functions:\n{}", tool_lines.join("\n"))
    };
    format!(
        "You are an expert assistant who solves tasks by writing Python code.\n\
         Proceed in cycles of 'Thought:', 'Code:', and 'Observation:'.\n\
         In 'Thought:' explain your plan for the next step. In 'Code:' write a single\n\
         Python block opened with ```python and terminated with ```{end}.\n\
         The observation of each execution (print output or error) is fed back to you.\n\
         When you know the final result, call final_answer(result) inside the code block.\n\n\
         {tools}\n\n\
         State persists between code blocks: variables and functions you define remain available.",
        end = END_CODE_TOKEN,
        tools = tools_section,
    )
}

/// Prompt asking the route worker to pick a strategy.
pub fn route_prompt(input: &Input, routes: &[(String, String)]) -> String {
    let mut listing = String::new();
    for (name, description) in routes {
        listing.push_str(&format!("- {}: {}\n", name, description));
    }
    format!(
        "You are choosing the best strategy to answer a query.\n\
         Available strategies:\n{listing}\n\
         Query type: {qt}\nQuery:\n{q}\n\n\
         Reply with the name of the single best strategy, exactly as listed, and nothing else.",
        listing = listing,
        qt = input.query_type,
        q = input.query_text(),
    )
}

/// Prompt asking for a task plan as a JSON array.
pub fn plan_prompt(input: &Input, routes: &[(String, String)], previous_error: &str) -> String {
    let mut listing = String::new();
    for (name, description) in routes {
        listing.push_str(&format!("- {}: {}\n", name, description));
    }
    let mut prompt = format!(
        "Break the task below into an ordered list of subtasks. Reply with a JSON array only.\n\
         Each element must be an object with fields:\n\
         \"task_id\" (string), \"instruction\" (string), \"output_key\" (unique string),\n\
         \"dependent\" (array of output_keys this task needs), and optionally \"route\"\n\
         (one of the strategies below) for the worker that should run it.\n\n\
         Strategies:\n{}\nTask:\n{}\n",
        listing,
        input.query_text(),
    );
    if !previous_error.is_empty() {
        prompt.push_str(&format!("\nPrevious plan was invalid: {}\n", previous_error));
    }
    prompt
}

/// Prompt for the LLM critic.
pub fn check_prompt(input: &Input) -> String {
    format!(
        "Let's think step by step to verify this answer.\n\
         Question:\n{q}\n\nProposed answer:\n{a}\n\n\
         Judge whether the proposed answer is correct. Reply with exactly this XML:\n\
         <root><feedback>one short paragraph of feedback</feedback>\
         <correct>true or false</correct>\
         <score>a number between 0 and 1</score></root>",
        q = input.query_text(),
        a = input.answer,
    )
}

/// Prompt for the improver given critic feedback.
pub fn improve_prompt(input: &Input) -> String {
    format!(
        "Your previous answer to the question below was judged insufficient.\n\
         Question:\n{q}\n\nPrevious answer:\n{a}\n\nFeedback:\n{f}\n\n\
         Produce an improved answer that addresses the feedback.",
        q = input.query_text(),
        a = input.answer,
        f = input.feedback,
    )
}

/// Prompt used by auto-compact to summarize a span of conversation.
pub fn summary_prompt() -> String {
    "Summarize the following conversation span into a concise paragraph. Focus on: what was \
     asked, what was accomplished, what failed, and any facts needed to continue the \
     conversation."
        .to_string()
}
