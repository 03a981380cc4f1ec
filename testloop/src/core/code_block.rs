/// Reduce an LLM response to the body of its first fenced code block.
///
/// Both language-tagged (```` ```kotlin ````) and generic fences are accepted.
/// Responses without a complete fence are returned trimmed.
pub fn extract_code(response: &str) -> String {
    let Some(open) = response.find("```") else {
        return response.trim().to_string();
    };
    let after_fence = &response[open + 3..];
    // Skip the info string (language tag) up to the end of the fence line.
    let Some(newline) = after_fence.find('\n') else {
        return response.trim().to_string();
    };
    let body = &after_fence[newline + 1..];
    match body.find("```") {
        Some(close) => body[..close].trim_end().to_string(),
        None => response.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_language_tagged_block() {
        let response = "Here you go:\n```kotlin\nclass FooTest {}\n```\nThanks";
        assert_eq!(extract_code(response), "class FooTest {}");
    }

    #[test]
    fn extracts_generic_block() {
        let response = "```\nfun a() = 1\n```";
        assert_eq!(extract_code(response), "fun a() = 1");
    }

    #[test]
    fn uses_first_block_only() {
        let response = "```java\nA\n```\n```java\nB\n```";
        assert_eq!(extract_code(response), "A");
    }

    #[test]
    fn falls_back_to_raw_text() {
        assert_eq!(extract_code("  class T {}\n"), "class T {}");
        assert_eq!(extract_code("```kotlin\nunterminated"), "```kotlin\nunterminated");
    }
}
