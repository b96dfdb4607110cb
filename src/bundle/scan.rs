// src/bundle/scan.rs

//! Static discovery of agent declarations in compiled config code.
//!
//! Two shapes are recognised, in this order:
//!
//! 1. Keys of the top-level `agents: { ... }` object literal, in declaration
//!    order.
//! 2. `const <name> = createAgent(...)` call-site binding names not already
//!    covered by the agents map.
//!
//! Extraction of names, tool keys and model identifiers from the surrounding
//! object literal is best-effort: a config that defeats the scanner still
//! compiles, it just falls back to a single "main" bundle upstream.

use std::sync::OnceLock;

use regex::Regex;

/// One discovered agent declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRef {
    pub id: String,
    pub name: Option<String>,
    pub tools: Vec<String>,
    pub models: Vec<String>,
}

impl AgentRef {
    fn from_body(id: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            name: extract_name(body),
            tools: extract_tools(body),
            models: extract_models(body),
        }
    }
}

fn agents_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bagents\s*:\s*\{").expect("static regex"))
}

fn create_agent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*createAgent\s*\(")
            .expect("static regex")
    })
}

/// Scan compiled code for agent declarations. Returns them in
/// source-declaration order; an empty result means the caller should emit
/// the fallback "main" bundle.
pub fn scan_agents(code: &str) -> Vec<AgentRef> {
    let mut agents: Vec<AgentRef> = Vec::new();

    if let Some(m) = agents_block_re().find(code) {
        let open = m.end() - 1;
        if let Some(block) = balanced_slice(code, open, '{', '}') {
            for (key, value) in object_entries(block) {
                let Some(body) = object_body(value) else {
                    continue;
                };
                if body.trim().is_empty() {
                    // Malformed/empty declaration like `agent: {}`.
                    continue;
                }
                agents.push(AgentRef::from_body(&key, body));
            }
        }
    }

    for caps in create_agent_re().captures_iter(code) {
        let id = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if id.is_empty() || agents.iter().any(|a| a.id == id) {
            continue;
        }
        let open = caps.get(0).map(|m| m.end() - 1).unwrap_or(0);
        let body = balanced_slice(code, open, '(', ')').unwrap_or("");
        agents.push(AgentRef::from_body(id, body));
    }

    agents
}

/// Slice between the delimiter at `open` and its balanced closer, exclusive
/// of both. Returns `None` when the code is truncated or unbalanced.
fn balanced_slice(code: &str, open: usize, opener: char, closer: char) -> Option<&str> {
    debug_assert_eq!(code[open..].chars().next(), Some(opener));
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in code[open..].char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => in_string = Some(ch),
            c if c == opener => depth += 1,
            c if c == closer => {
                depth -= 1;
                if depth == 0 {
                    return Some(&code[open + opener.len_utf8()..open + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a `{ ... }` body (without the outer braces) into `(key, value)`
/// pairs at depth zero. Keys may be bare identifiers or quoted strings;
/// values are the raw source slices.
fn object_entries(body: &str) -> Vec<(String, &str)> {
    let mut entries = Vec::new();
    let bytes = body.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        // Skip whitespace and separators.
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let key = match read_key(body, &mut i) {
            Some(k) => k,
            None => break,
        };

        // Expect a colon; spread/shorthand entries are skipped.
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b':' {
            skip_to_depth_zero_comma(body, &mut i);
            continue;
        }
        i += 1;

        let value_start = i;
        skip_to_depth_zero_comma(body, &mut i);
        entries.push((key, body[value_start..i].trim()));
        if i < bytes.len() {
            i += 1; // consume the comma
        }
    }

    entries
}

fn read_key(body: &str, i: &mut usize) -> Option<String> {
    let bytes = body.as_bytes();
    let start = *i;
    match bytes[start] {
        b'"' | b'\'' => {
            let quote = bytes[start];
            let mut j = start + 1;
            while j < bytes.len() && bytes[j] != quote {
                j += 1;
            }
            if j >= bytes.len() {
                return None;
            }
            *i = j + 1;
            Some(body[start + 1..j].to_string())
        }
        c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => {
            let mut j = start;
            while j < bytes.len()
                && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_' || bytes[j] == b'$')
            {
                j += 1;
            }
            *i = j;
            Some(body[start..j].to_string())
        }
        _ => None,
    }
}

/// Advance `i` to the next comma at nesting depth zero, or to end of input.
fn skip_to_depth_zero_comma(body: &str, i: &mut usize) {
    let mut depth = 0i32;
    let mut in_string: Option<u8> = None;
    let mut escaped = false;
    let bytes = body.as_bytes();

    while *i < bytes.len() {
        let b = bytes[*i];
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == quote {
                in_string = None;
            }
        } else {
            match b {
                b'"' | b'\'' | b'`' => in_string = Some(b),
                b'{' | b'[' | b'(' => depth += 1,
                b'}' | b']' | b')' => depth -= 1,
                b',' if depth == 0 => return,
                _ => {}
            }
        }
        *i += 1;
    }
}

/// Extract the `{ ... }` body from a value slice, whether the value is a
/// plain object literal or a `createAgent({ ... })` call.
fn object_body(value: &str) -> Option<&str> {
    let open = value.find('{')?;
    balanced_slice(value, open, '{', '}')
}

fn extract_name(body: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"\bname\s*:\s*["'`]([^"'`]+)["'`]"#).expect("static regex")
    });
    re.captures(body).map(|c| c[1].to_string())
}

fn extract_tools(body: &str) -> Vec<String> {
    static OBJ_RE: OnceLock<Regex> = OnceLock::new();
    let obj_re =
        OBJ_RE.get_or_init(|| Regex::new(r"\btools\s*:\s*\{").expect("static regex"));

    if let Some(m) = obj_re.find(body) {
        if let Some(block) = balanced_slice(body, m.end() - 1, '{', '}') {
            return object_entries(block).into_iter().map(|(k, _)| k).collect();
        }
    }

    // Array form: tools: ["search", "fetch"]
    static ARR_RE: OnceLock<Regex> = OnceLock::new();
    let arr_re = ARR_RE
        .get_or_init(|| Regex::new(r#"\btools\s*:\s*\[([^\]]*)\]"#).expect("static regex"));
    static ITEM_RE: OnceLock<Regex> = OnceLock::new();
    let item_re =
        ITEM_RE.get_or_init(|| Regex::new(r#"["'`]([^"'`]+)["'`]"#).expect("static regex"));

    arr_re
        .captures(body)
        .map(|c| {
            let items = c.get(1).map(|m| m.as_str()).unwrap_or("");
            item_re
                .captures_iter(items)
                .map(|i| i[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn extract_models(body: &str) -> Vec<String> {
    static LITERAL_RE: OnceLock<Regex> = OnceLock::new();
    let literal_re = LITERAL_RE.get_or_init(|| {
        Regex::new(r#"\bmodel\s*:\s*["'`]([^"'`]+)["'`]"#).expect("static regex")
    });
    static CALL_RE: OnceLock<Regex> = OnceLock::new();
    let call_re = CALL_RE.get_or_init(|| {
        Regex::new(r#"\bmodel\s*:\s*[A-Za-z_$][A-Za-z0-9_$]*\s*\(\s*["'`]([^"'`]+)["'`]"#)
            .expect("static regex")
    });

    let mut models = Vec::new();
    for caps in literal_re.captures_iter(body).chain(call_re.captures_iter(body)) {
        let model = caps[1].to_string();
        if !models.contains(&model) {
            models.push(model);
        }
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_AGENTS: &str = r#"
        var config = {
          agents: {
            agent1: createAgent({ name: "Agent One", model: "gpt-4o", tools: { search: s, fetch: f } }),
            agent2: { name: "Agent Two", model: anthropic("claude-sonnet-4") },
            agent3: createAgent({ name: "Agent Three", tools: ["browse"] }),
          },
        };
        export default config;
    "#;

    #[test]
    fn discovers_agents_in_declaration_order() {
        let agents = scan_agents(THREE_AGENTS);
        let ids: Vec<_> = agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["agent1", "agent2", "agent3"]);
    }

    #[test]
    fn extracts_names_tools_and_models() {
        let agents = scan_agents(THREE_AGENTS);

        assert_eq!(agents[0].name.as_deref(), Some("Agent One"));
        assert_eq!(agents[0].tools, vec!["search", "fetch"]);
        assert_eq!(agents[0].models, vec!["gpt-4o"]);

        assert_eq!(agents[1].models, vec!["claude-sonnet-4"]);
        assert_eq!(agents[2].tools, vec!["browse"]);
    }

    #[test]
    fn empty_entries_are_malformed_and_skipped() {
        let code = "export default { agents: { broken: {}, other: {} } };";
        assert!(scan_agents(code).is_empty());
    }

    #[test]
    fn no_agents_section_yields_empty() {
        assert!(scan_agents("export default { name: 'x' };").is_empty());
    }

    #[test]
    fn call_site_bindings_are_discovered() {
        let code = r#"
            const support = createAgent({ name: "Support", model: "gpt-4o-mini" });
            const triage = createAgent({ name: "Triage" });
        "#;
        let ids: Vec<_> = scan_agents(code).iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec!["support", "triage"]);
    }

    #[test]
    fn map_keys_shadow_call_site_bindings() {
        let code = r#"
            const agent1 = createAgent({ name: "A" });
            export default { agents: { agent1: agent1_impl({ name: "A" }) } };
        "#;
        let agents = scan_agents(code);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "agent1");
    }

    #[test]
    fn quoted_keys_and_nested_braces_survive() {
        let code = r#"
            export default { agents: {
              "agent/one": { name: "slash", settings: { nested: { deep: true } } },
            } };
        "#;
        let agents = scan_agents(code);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "agent/one");
    }
}
