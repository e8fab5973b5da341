// src/utils/html.rs

/// Escapes user-supplied text (names, references, answers) before it is placed
/// inside an HTML mail body. Every character that could open markup is
/// entity-encoded, so `<b>` shows up literally instead of rendering.
pub fn escape_text(input: &str) -> String {
    ammonia::clean_text(input)
}
