//! Prompt templates for the pipeline stages. Centralized so prompt
//! iteration never touches stage logic.

/// Prompt for deciding whether tools are needed.
pub fn decide_tools(
    system_context: &str,
    query: &str,
    tools_text: &str,
    history_context: &str,
    files_context: &str,
) -> String {
    format!(
        r#"{system_context}

**Task:** Decide if you should use tools to answer this question.

{history_context}{files_context}
**Current User Question:** {query}

**Available Tools:**
{tools_text}

**Decision Rules (IMPORTANT: Check conversation history first):**

**FIRST: Check if the answer is already in the conversation history:**
- If the user is asking a **follow-up question** about information that was ALREADY retrieved in previous messages, DO NOT use tools again
- Look for references to specific IDs mentioned in conversation history (e.g., logbook entry numbers, article IDs)
- If the user asks "give me the complete entry for X" and X was already retrieved, use the history context
- If the user asks "tell me more about X" where X is in conversation history, use the existing context

**SECOND: When to use tools (default for new queries):**
- **DEFAULT: Use tools** for NEW questions that require current, external, or additional information not in conversation history
- Use tools if the question asks about real-time data (weather, news, prices, events, etc.)
- Use tools for facility-specific information (accelerators, operations, logs) that hasn't been retrieved yet
- Use tools if the conversation history doesn't contain sufficient detail to answer

**When NOT to use tools:**
- Pure greetings: "hello", "hi", "thanks"
- Follow-up questions about information already in conversation history
- **Questions about uploaded files or images** - answer directly using the file content provided above
- Conversation meta-questions: "what did I just ask?", "summarize our conversation"

Reply with JSON only:
{{
  "needs_tools": true/false,
  "reasoning": "brief explanation"
}}
"#
    )
}

/// Prompt for selecting which tools to call.
pub fn select_tools(
    system_context: &str,
    query: &str,
    tools_text: &str,
    history_context: &str,
    refinement_context: &str,
) -> String {
    format!(
        r##"{system_context}

**Task:** Select which tools to call to answer the user's question.

{history_context}
**Current User Question:** {query}

**Available Tools:**
{tools_text}

{refinement_context}

**Context Extraction from Conversation History:**
- If the user asks about a specific entry, ID, or reference mentioned in the conversation history above, extract that information
- Look for logbook entry numbers (e.g., "#39109"), article IDs, or other identifiers
- Use the appropriate tool with the extracted ID to fetch complete information
- Example: "show me the full entry" -> look in history for the entry ID, then use get_elog_thread or search_elog with that ID

**General Strategy:**
- Start with minimal arguments - only use REQUIRED parameters and those essential for the query
- Optional parameters should only be added if specifically mentioned in the user's question
- If initial results are too generic, refine with additional filters in a follow-up tool call
- Use the logbook tool for any questions about incidents, events, or operational history
- Use the knowledge-base tool for questions about accelerator facilities
- Use web-search tools for current events, news, weather, or general external info
- Use multiple tools in sequence when it makes sense to narrow down or cross-reference results
- Be specific with parameter values (use exact enum options shown above)

**Date Handling:**
- Use the current date from the system context above to calculate relative dates
- "today" = current date
- "yesterday" = subtract 1 day from current date
- "last week" = subtract 7 days from current date for `since` parameter
- "last month" = subtract 30 days from current date
- "last weekend": count back from the current weekday to the most recent Saturday and Sunday
- Always use ISO format YYYY-MM-DD for date parameters

**Tool-Specific Guidelines:**

**search_accelerator_knowledge (knowledge base):**
- Extract the facility from the query and pass it via the accelerator parameter
- Use "all" only if the query explicitly asks about multiple facilities
- Retriever: default to "dense" unless the query needs exact term matching
- Use for documentation, procedures, technical details about accelerators

**search_elog (logbook):**
- Used for operational logs, incidents, and recent events
- Extract filters from the query: category, system, domain, date range
- Date filters: only use `since`/`until` if a time range is mentioned
- Category examples: "Problem", "Shift", "Info", "Solution"
- **max_results parameter (CRITICAL for temporal queries):**
  * For summaries ("summarize last weekend", "what happened last week"): use max_results=50-100 to ensure full coverage
  * For specific searches ("beam dump issues"): use the default (20) or lower
  * The logbook returns chronologically (newest first), so a large max_results ensures entries from the entire time period

**get_elog_thread (logbook):**
- Fetches a COMPLETE logbook entry with all details and its conversation thread
- REQUIRED parameter: entry_id (integer) - the logbook entry number
- Use when the user asks for "full entry", "complete details", or references a specific entry ID
- Extract entry_id from conversation history or from the user's question

**Web Search Tools:**
- For current events, weather, news, or external information
- Keep queries concise and focused
- Avoid optional parameters unless critical

Reply with JSON only:
{{
  "tools": [
    {{
      "tool_name": "exact_tool_name",
      "arguments": {{"param": "value"}},
      "reasoning": "why this tool"
    }}
  ]
}}
"##
    )
}

/// Prompt for judging whether tool results suffice to answer the query.
pub fn evaluate_results(
    system_context: &str,
    query: &str,
    summary_text: &str,
    tool_calls_text: &str,
) -> String {
    let tool_calls_section = if tool_calls_text.is_empty() {
        String::new()
    } else {
        format!("\n**Tools Called:**\n{tool_calls_text}\n")
    };

    let context_section = if system_context.is_empty() {
        String::new()
    } else {
        format!("{system_context}\n\n")
    };

    format!(
        r#"{context_section}Evaluate if the tool results provide sufficient data to answer the user's question.

**User Question:** {query}
{tool_calls_section}
**Results from Tools:**
{summary_text}

**Evaluation Criteria:**

Tools return **structured JSON data** (entries, records, search results, etc.), NOT formatted answers.

Mark as **ADEQUATE** if:
- Tool returned relevant structured data (entries, hits, records) that contain information to answer the question
- The data is relevant to the question, even if it needs formatting/synthesis
- There are results, even if they need to be presented in a specific format

Mark as **INADEQUATE** only if:
- No results returned (empty dataset)
- Results are completely irrelevant to the question
- Tool error or missing critical data fields
- Wrong tool was called (e.g., used web search when the logbook was needed)
- **Wrong date range**: if the user asked for a specific time period, check whether result timestamps match it

**Remember**: Your job is to check if DATA exists, not if it's formatted nicely. Formatting happens in the next step.

**Refinement Suggestions (only if inadequate):**
- Use a different tool or parameters
- Add/modify filters or search terms
- Expand or narrow the search scope
- **Fix date parameters**: if dates are wrong, recalculate correct since/until values from the current date and the user's intent

Reply with JSON only:
{{
  "adequate": true/false,
  "reasoning": "brief explanation of data availability",
  "refinement": "specific parameter changes if inadequate"
}}
"#
    )
}

/// Prompt for generating the final answer from tool results.
pub fn answer_with_tools(
    system_context: &str,
    query: &str,
    context_text: &str,
    references_text: &str,
    images_text: &str,
) -> String {
    format!(
        r#"{system_context}

**Task:** Answer the user's question using the provided context.

**User Question:** {query}

**Context from Tools:**
{context_text}

**Available Source References:**
{references_text}
{images_text}

**General Instructions:**
- **CRITICAL: Match the language of the user's question EXACTLY:**
  * If the user question is in English -> respond in English
  * If the user question is in German -> respond in German
  * The language of source documents or logbook entries does NOT matter - only the user's question language
- Be concise and technical (2-4 paragraphs)
- Ground your answer in the provided context
- Cite sources with clickable URLs
- If context is insufficient, acknowledge this clearly

**Formatting Guidelines:**

**Citations (General):**
- Use the domain name as the link text: [domain.com](URL)
- Example: "According to [bbc.com](https://www.bbc.com/weather/1668341)..."
- NOT: "According to [source description](URL)" or "[Web-1]"

**Images:**
- Include attached images in your answer when relevant
- Insert inline using: ![Image caption](image_url)
- Place in the relevant paragraph, not at the end

**Math and Currency:**
- Currency: write in plain text without $ symbols: "111,431 USD" or "71.4 billion USD"
- Math equations: wrap with two dollar signs: $$formula$$

**Tool-Specific Formatting:**

**Logbook Entries (from search_elog, get_elog_thread):**
- Always include: date/time (from the Date field, NOT times mentioned in content), author, category, system/domain, the full content text, and a clickable URL
- For "show me the entry" or "full details" -> use a detailed structured format (tables work well)
- For "what happened" or summary questions -> present naturally in prose with key metadata
- Do NOT summarize entry content unless the user asks for a summary
- Display attachment images inline with ![](url) only when the entry content mentions them or the user explicitly asks; otherwise list them as clickable links

**Knowledge Base (from search_accelerator_knowledge):**
- Cite with the facility name if available: "According to the SLS documentation..."
- Include the article title if relevant
- Always provide a clickable link

**Web Search Results:**
- **The "Content:" field contains the actual answer data** - read it carefully to extract specific information (prices, dates, facts, numbers)
- Answer the user's question directly using the data from the Content field
- Use the domain name in the citation: [domain.com](URL)
- Include the publication date if available
- If multiple sources provide the same information, cite the most relevant one

**Answer:**
"#
    )
}

/// Prompt for answering directly from knowledge, history, and files.
pub fn answer_no_tools(
    system_context: &str,
    query: &str,
    history_context: &str,
    files_context: &str,
) -> String {
    format!(
        r#"{system_context}

**Task:** Answer this question using your knowledge, the conversation history, and any uploaded files.

{history_context}{files_context}
**Current Question:** {query}

**Instructions:**

**For Follow-Up Questions:**
- **CAREFULLY examine the conversation history above** - it may contain the complete information needed to answer
- If the user is asking for "complete" or "full" details about something mentioned in the history, extract and present that information
- Look for specific IDs, entries, or references in the conversation history (e.g., logbook entry numbers, article IDs, event names)
- **Citations**: when using information from conversation history that originally came from tools, maintain the original source citations and URLs

**General Instructions:**
- **CRITICAL: Match the language of the user's question EXACTLY** - the language of source documents or conversation history does not matter
- Be comprehensive when the user asks for "complete" or "full" information - don't summarize unnecessarily
- If the conversation history contains the answer, use it - don't say you need to search again
- If uploaded files are provided above, use that information to answer the question
- For documents, the full text is provided in the context
- For images, describe what you see if the question is about the image
- For math equations, wrap them with TWO dollar signs on each side: $$formula$$
- If information is truly missing and not in history, then acknowledge you would need to search

**Answer:**
"#
    )
}

/// Prompt for the vision model analyzing uploaded images.
pub fn answer_with_vision(
    system_context: &str,
    query: &str,
    image_count: usize,
    history_context: &str,
) -> String {
    format!(
        r#"{system_context}

**Task:** Analyze the uploaded image(s) and answer the user's question.

{history_context}
**User Question:** {query}

**Images Available:** {image_count} image(s) provided below

**Instructions:**
- **CRITICAL: Match the language of the user's question EXACTLY**
- Carefully examine all image(s) provided
- Answer the user's specific question about the image(s)
- Describe relevant visual details that help answer the question
- Be specific, detailed, and technical in your description
- If multiple images are provided, compare and contrast if relevant to the question
- For diagrams or technical images, explain the components, labels, and relationships
- For scientific images, identify key features and provide technical analysis
- For math equations in images, wrap LaTeX formulas with TWO dollar signs: $$formula$$

**Answer:**
"#
    )
}
