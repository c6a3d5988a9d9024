//! Flat-file format for command requests.
//!
//! Requests are written as `=== REQUEST ===` … `=== END ===` blocks of
//! `key|value` lines. Unknown keys and malformed blocks are skipped so old
//! files keep loading after format additions.

use std::collections::HashMap;

use chrono::Local;
use tracing::warn;

use gsw_core::clock;

use crate::CommandRequest;

const BLOCK_BEGIN: &str = "=== REQUEST ===";
const BLOCK_END: &str = "=== END ===";

pub(crate) fn render(requests: &HashMap<String, CommandRequest>) -> String {
    let mut ordered: Vec<&CommandRequest> = requests.values().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut out = String::new();
    for request in ordered {
        out.push_str(BLOCK_BEGIN);
        out.push('\n');
        out.push_str(&format!("id|{}\n", request.id));
        out.push_str(&format!("applicant|{}\n", request.applicant));
        out.push_str(&format!("command|{}\n", request.command));
        out.push_str(&format!("reason|{}\n", request.reason));
        if let Some(image) = &request.image {
            out.push_str(&format!("image|{image}\n"));
        }
        out.push_str(&format!(
            "created|{}\n",
            clock::format_stamp(request.created_at)
        ));
        out.push_str(&format!("executed|{}\n", request.executed));
        if let Some(executed_at) = request.executed_at {
            out.push_str(&format!(
                "executed_at|{}\n",
                clock::format_stamp(executed_at)
            ));
        }
        let votes: Vec<&str> = request.voted_ips.iter().map(String::as_str).collect();
        out.push_str(&format!("votes|{}\n", votes.join(",")));
        out.push_str(BLOCK_END);
        out.push('\n');
    }
    out
}

pub(crate) fn parse(text: &str) -> HashMap<String, CommandRequest> {
    let mut requests = HashMap::new();
    let mut block: Option<Vec<(String, String)>> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if line == BLOCK_BEGIN {
            block = Some(Vec::new());
        } else if line == BLOCK_END {
            if let Some(fields) = block.take() {
                match build_request(fields) {
                    Some(request) => {
                        requests.insert(request.id.clone(), request);
                    }
                    None => warn!("skipping malformed request block"),
                }
            }
        } else if let Some(fields) = block.as_mut() {
            if let Some((key, value)) = line.split_once('|') {
                fields.push((key.to_string(), value.to_string()));
            }
        }
    }
    requests
}

fn build_request(fields: Vec<(String, String)>) -> Option<CommandRequest> {
    let mut request = CommandRequest {
        id: String::new(),
        applicant: String::new(),
        command: String::new(),
        reason: String::new(),
        image: None,
        voted_ips: Default::default(),
        created_at: Local::now(),
        executed_at: None,
        executed: false,
    };

    for (key, value) in fields {
        match key.as_str() {
            "id" => request.id = value,
            "applicant" => request.applicant = value,
            "command" => request.command = value,
            "reason" => request.reason = value,
            "image" => {
                if !value.is_empty() {
                    request.image = Some(value);
                }
            }
            "created" => {
                if let Some(stamp) = clock::parse_stamp(&value) {
                    request.created_at = stamp;
                }
            }
            "executed" => request.executed = value == "true" || value == "1",
            "executed_at" => request.executed_at = clock::parse_stamp(&value),
            "votes" => {
                request.voted_ips = value
                    .split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    if request.id.is_empty() || request.applicant.is_empty() || request.command.is_empty() {
        return None;
    }
    // An executed request always carries its execution time.
    if request.executed && request.executed_at.is_none() {
        request.executed_at = Some(request.created_at);
    }
    Some(request)
}
