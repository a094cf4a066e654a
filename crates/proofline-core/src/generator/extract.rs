//! Pull code out of fenced model responses.

/// Body of the last fenced block tagged `lang` (```` ```lean ````). Falls
/// back to the last untagged fenced block, then to the trimmed response.
pub fn extract_code_block(response: &str, lang: &str) -> String {
    let blocks = fenced_blocks(response);
    if let Some((_, body)) = blocks.iter().rev().find(|(tag, _)| tag.eq_ignore_ascii_case(lang)) {
        return body.trim().to_string();
    }
    if let Some((_, body)) = blocks.iter().rev().find(|(tag, _)| tag.is_empty()) {
        return body.trim().to_string();
    }
    response.trim().to_string()
}

/// [`extract_code_block`] for ```` ```json ```` blocks.
pub fn extract_json_block(response: &str) -> String {
    extract_code_block(response, "json")
}

/// `(tag, body)` for each complete fenced block, in order.
fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match open.take() {
            None => {
                if let Some(tag) = trimmed.strip_prefix("```") {
                    open = Some((tag.trim().to_string(), Vec::new()));
                }
            }
            Some((tag, mut body)) => {
                if trimmed.trim_end() == "```" {
                    blocks.push((tag, body.join("\n")));
                } else {
                    body.push(line);
                    open = Some((tag, body));
                }
            }
        }
    }
    blocks
}
