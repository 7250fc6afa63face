//! Prompt text for grounded health answers.

/// Default role and behaviour preamble sent as the system message.
pub const SYSTEM_PREAMBLE: &str = "You are a knowledgeable health assistant with access to the user's health data and uploaded medical documents. Your role is to:

1. Provide accurate, evidence-based health information
2. Help users understand their health metrics and trends
3. Answer questions about their medical documents
4. Offer general wellness advice
5. Identify patterns in health data

Important guidelines:
- Always emphasize that you're not a replacement for professional medical advice
- Encourage users to consult healthcare providers for serious concerns
- Base answers on the health data and document excerpts provided with each question
- Be empathetic and supportive while being informative
- If health metrics are concerning, gently suggest medical consultation
- If the provided context does not answer the question, say so instead of guessing";

/// Shown in place of an empty health summary.
pub const NO_HEALTH_DATA: &str = "No recent health data available.";

/// Shown in place of an empty document context.
pub const NO_DOCUMENTS: &str = "No relevant documents found.";

/// Builds the user turn from the question and both context blocks.
pub fn build_user_prompt(question: &str, health_summary: &str, document_context: &str) -> String {
    let health_summary = non_empty_or(health_summary, NO_HEALTH_DATA);
    let document_context = non_empty_or(document_context, NO_DOCUMENTS);

    format!(
        "Based on the user's query and the available context, provide a comprehensive response.

User Query: {question}

Health Data Context:
{health_summary}

Document Context:
{document_context}

Please provide a helpful response that:
1. Directly addresses the user's question
2. References relevant information from their health data
3. Incorporates insights from their uploaded documents, citing excerpts by their [n] number
4. Offers actionable advice when appropriate

Remember to always recommend consulting with healthcare professionals for medical decisions."
    )
}

fn non_empty_or<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}
