//! Shared utilities for rapply.

fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
            end += char_len;
            continue;
        }

        if c == '\\' {
            escaped = true;
            end += char_len;
            continue;
        }

        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            end += char_len;
            continue;
        }

        if c == '"' || c == '\'' {
            in_quote = Some(c);
            end += char_len;
            continue;
        }

        if c.is_whitespace() || c == ';' {
            break;
        }

        end += char_len;
    }
    end
}

/// Mask secrets in a remote command string before logging.
///
/// Covers sudo passwords piped on the command line, data collector tokens
/// and the usual `*_TOKEN=` / `*PASSWORD=` environment assignments.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let patterns = [
        ("data_collector.token ", "data_collector.token ***"),
        ("DATA_COLLECTOR_TOKEN=", "DATA_COLLECTOR_TOKEN=***"),
        ("SUDO_PASSWORD=", "SUDO_PASSWORD=***"),
        ("PASSWORD=", "PASSWORD=***"),
        ("TOKEN=", "TOKEN=***"),
        ("--sudo-password ", "--sudo-password ***"),
        ("--sudo-password=", "--sudo-password=***"),
        ("--password ", "--password ***"),
        ("--password=", "--password=***"),
        ("--token ", "--token ***"),
        ("--token=", "--token=***"),
    ];

    let mut result = cmd.to_string();
    for (pattern, replacement) in patterns {
        // Track search position; the replacement contains the pattern
        let mut search_start = 0;
        while search_start < result.len() {
            let Some(start) = result[search_start..].find(pattern) else {
                break;
            };
            let abs_start = search_start + start;
            let value_start = abs_start + pattern.len();

            let rest = &result[value_start..];
            if rest.starts_with("***") {
                search_start = value_start + 3;
                continue;
            }
            let value_end = value_start + find_value_end(rest);

            let prefix = &result[..abs_start];
            let suffix = &result[value_end..];
            result = format!("{}{}{}", prefix, replacement, suffix);

            search_start = abs_start + replacement.len();
        }
    }

    result
}

/// Last path component of a local or remote path, accepting either separator.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
