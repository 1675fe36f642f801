//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

impl Config {
    /// Render the whole config as a commented TOML file
    pub fn to_toml(&self) -> String {
        let open_command = match &self.worker.open_command {
            Some(cmd) => format!("open_command = {}", quote(cmd)),
            None => "# open_command = \"xdg-open\"".to_string(),
        };
        let precache = self
            .worker
            .precache
            .iter()
            .map(|p| format!("    {},", quote(p)))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"# herald configuration

# Address of the worker/app HTTP surface
bind_addr = "{bind}"

# The campaign site served through the worker
origin_url = {origin}

# Campaign API base (push subscribe/unsubscribe are posted under it)
api_url = {api}

# Where preferences, analytics and caches are stored
data_dir = {data_dir}

# Display mode recorded with analytics events: standalone, browser
display_mode = "{display_mode}"

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = {log_level}
# JSON file logging (in addition to stdout)
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = {log_file_prefix}

# Cache lifecycle
[worker]
# Bump the version to drop every older cache on next activation
cache_name = {cache_name}
# Served to offline navigations; always precached
offline_page = {offline_page}
install_retry_secs = {install_retry}
{open_command}
precache = [
{precache}
]

# Push notifications
[push]
enabled = {push_enabled}
# Application server public key (HERALD_PUSH_PUBLIC_KEY overrides)
public_key = {public_key}
# Permission answers: granted, denied, prompt (ask on the terminal)
permission = "{permission}"
# Unanswered prompts count as denied after this many seconds (0 = wait)
permission_timeout_secs = {permission_timeout}

# Remote calls
[http]
timeout_secs = {http_timeout}
"#,
            bind = self.bind_addr,
            origin = quote(&self.origin_url),
            api = quote(&self.api_url),
            data_dir = quote(&self.data_dir.display().to_string()),
            display_mode = self.display_mode.as_str(),
            log_level = quote(&self.logging.level),
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quote(&self.logging.file_dir.display().to_string()),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = quote(&self.logging.file_prefix),
            cache_name = quote(&self.worker.cache_name),
            offline_page = quote(&self.worker.offline_page),
            install_retry = self.worker.install_retry_secs,
            open_command = open_command,
            precache = precache,
            push_enabled = self.push.enabled,
            public_key = quote(&self.push.public_key),
            permission = self.push.permission.as_str(),
            permission_timeout = self.push.permission_timeout_secs,
            http_timeout = self.http.timeout_secs,
        )
    }
}

/// TOML basic string with escapes (paths on Windows contain backslashes)
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
