//! Graphviz export of bins for debugging.
//!
//! Elements become clusters holding their pads, bins become clusters holding
//! their children, and links are edges between pads. Render the output with
//! `dot -Tsvg pipeline.dot > pipeline.svg`.

use super::bin::Bin;
use crate::element::{Element, Pad, PadDirection, State};
use crate::error::Result;
use crate::runtime;
use std::fmt::{self, Write};
use std::path::PathBuf;
use tracing::{debug, trace};

crate::flags::bit_flags! {
    /// What to include in a graph dump.
    pub struct DebugGraphDetails {
        /// Media type of the caps on links.
        const MEDIA_TYPE = 1 << 0;
        /// Full caps on links.
        const CAPS_DETAILS = 1 << 1;
        /// Properties that differ from their defaults.
        const NON_DEFAULT_PARAMS = 1 << 2;
        /// Element states.
        const STATES = 1 << 3;
        /// Everything.
        const ALL = (1 << 4) - 1;
    }
}

/// Render `bin` and everything inside it as a DOT graph.
pub fn debug_bin_to_dot_data(bin: &Bin, details: DebugGraphDetails) -> String {
    let mut out = String::new();
    match render(&mut out, bin, details) {
        Ok(()) => out,
        Err(_) => String::new(),
    }
}

/// Write the DOT graph of `bin` to `<dot_dump_dir>/<file_name>.dot`.
///
/// Returns the written path, or `None` when no dump directory is configured
/// (see [`RuntimeConfig::dot_dump_dir`](crate::config::RuntimeConfig::dot_dump_dir)).
pub fn debug_bin_to_dot_file(
    bin: &Bin,
    details: DebugGraphDetails,
    file_name: &str,
) -> Result<Option<PathBuf>> {
    let Some(dir) = runtime::config().dot_dump_dir.clone() else {
        trace!(bin = %bin.name(), "no dump directory configured");
        return Ok(None);
    };
    let path = dir.join(format!("{file_name}.dot"));
    std::fs::write(&path, debug_bin_to_dot_data(bin, details))?;
    debug!(bin = %bin.name(), path = %path.display(), "wrote graph dump");
    Ok(Some(path))
}

fn render(out: &mut String, bin: &Bin, details: DebugGraphDetails) -> fmt::Result {
    writeln!(out, "digraph pipeline {{")?;
    writeln!(out, "  rankdir=LR;")?;
    writeln!(out, "  fontname=\"sans\";")?;
    writeln!(out, "  fontsize=\"10\";")?;
    writeln!(out, "  labelloc=t;")?;
    writeln!(out, "  nodesep=\".1\";")?;
    writeln!(out, "  ranksep=\".2\";")?;
    writeln!(
        out,
        "  label=\"<{}>\\n{}{}\";",
        bin.factory_name(),
        escape(bin.name()),
        state_suffix(bin, details)
    )?;
    writeln!(out, "  node [style=\"filled,rounded\", shape=box, fontsize=\"9\", fontname=\"sans\", margin=\"0.0,0.0\"];")?;
    writeln!(out, "  edge [labelfontsize=\"6\", fontsize=\"9\", fontname=\"monospace\"];")?;
    writeln!(out)?;

    let mut links = Vec::new();
    for child in bin.children() {
        write_element(out, &child, details, "  ", &mut links)?;
    }
    writeln!(out)?;
    for (src, sink) in &links {
        write_link(out, src, sink, details)?;
    }
    writeln!(out, "}}")
}

fn write_element(
    out: &mut String,
    element: &Element,
    details: DebugGraphDetails,
    indent: &str,
    links: &mut Vec<(Pad, Pad)>,
) -> fmt::Result {
    let id = element_id(element);
    let fill = if element.is_bin() {
        "#ffffff"
    } else if element.is_source() {
        "#ffaaaa"
    } else if element.is_sink() {
        "#aaaaff"
    } else {
        "#aaffaa"
    };

    writeln!(out, "{indent}subgraph cluster_{id} {{")?;
    writeln!(out, "{indent}  fontname=\"Bitstream Vera Sans\";")?;
    writeln!(out, "{indent}  fontsize=\"8\";")?;
    writeln!(out, "{indent}  style=\"filled,rounded\";")?;
    writeln!(out, "{indent}  color=black;")?;
    writeln!(out, "{indent}  fillcolor=\"{fill}\";")?;

    let mut label = format!(
        "{}\\n{}{}",
        escape(element.factory_name()),
        escape(element.name()),
        state_suffix(element, details)
    );
    if details.contains(DebugGraphDetails::NON_DEFAULT_PARAMS) {
        for (name, value) in element.non_default_properties() {
            label.push_str(&format!("\\n{name}={}", escape(&value.to_string())));
        }
    }
    writeln!(out, "{indent}  label=\"{label}\";")?;

    for pad in element.pads() {
        let fill = match pad.direction() {
            PadDirection::Src => "#ffaaaa",
            PadDirection::Sink => "#aaaaff",
        };
        let style = if pad.is_request() { "filled,dashed" } else { "filled,solid" };
        writeln!(
            out,
            "{indent}  {} [color=black, fillcolor=\"{fill}\", label=\"{}\", height=\"0.2\", style=\"{style}\"];",
            pad_id(&pad),
            escape(pad.name())
        )?;
        if pad.direction() == PadDirection::Src {
            if let Some(peer) = pad.peer() {
                links.push((pad.clone(), peer));
            }
        }
    }

    if let Some(bin) = element.as_bin() {
        let inner = format!("{indent}  ");
        for child in bin.children() {
            write_element(out, &child, details, &inner, links)?;
        }
    }
    writeln!(out, "{indent}}}")?;
    writeln!(out)
}

fn write_link(out: &mut String, src: &Pad, sink: &Pad, details: DebugGraphDetails) -> fmt::Result {
    let caps = src.caps().intersect(&sink.caps());
    let label = if details.contains(DebugGraphDetails::CAPS_DETAILS) {
        escape(&caps.to_string()).replace("; ", ";\\n")
    } else if details.contains(DebugGraphDetails::MEDIA_TYPE) {
        if caps.is_any() {
            "ANY".to_string()
        } else {
            caps.structures()
                .iter()
                .map(|s| escape(s.name()))
                .collect::<Vec<_>>()
                .join("\\n")
        }
    } else {
        String::new()
    };
    if label.is_empty() {
        writeln!(out, "  {} -> {};", pad_id(src), pad_id(sink))
    } else {
        writeln!(out, "  {} -> {} [label=\"{label}\"];", pad_id(src), pad_id(sink))
    }
}

fn state_suffix(element: &Element, details: DebugGraphDetails) -> String {
    if !details.contains(DebugGraphDetails::STATES) {
        return String::new();
    }
    let current = state_glyph(element.current_state());
    match element.pending_state() {
        Some(pending) => format!("\\n{current} -> {}", state_glyph(pending)),
        None => format!("\\n{current}"),
    }
}

fn state_glyph(state: State) -> &'static str {
    match state {
        State::Null => "[~]",
        State::Ready => "[-]",
        State::Paused => "[=]",
        State::Playing => "[>]",
    }
}

/// Node id built from the names on the path from the top-level bin.
fn element_id(element: &Element) -> String {
    let mut names = vec![element.name().to_string()];
    let mut current = element.parent();
    while let Some(parent) = current {
        names.push(parent.name().to_string());
        current = parent.parent();
    }
    names.reverse();
    sanitize(&names.join("_"))
}

fn pad_id(pad: &Pad) -> String {
    let owner = pad
        .parent_element()
        .map(|e| element_id(&e))
        .unwrap_or_else(|| "orphan".to_string());
    format!("{owner}_{}", sanitize(pad.name()))
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
