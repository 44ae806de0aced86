use crate::interp::InterpCore;
use crate::node::{NodeId, Unit};
use std::io::Write;
use std::process::{Command, Stdio};

/// Where a graph dump goes: the external rendering command's stdin when it
/// can be spawned, else a `.dot` file next to the temp dir.
enum DotSink {
    Process(std::process::Child),
    File(std::fs::File),
    Discard,
}

impl DotSink {
    fn write_all(&mut self, text: &str) {
        let _ = match self {
            DotSink::Process(child) => child
                .stdin
                .as_mut()
                .map(|stdin| stdin.write_all(text.as_bytes()))
                .unwrap_or(Ok(())),
            DotSink::File(file) => file.write_all(text.as_bytes()),
            DotSink::Discard => Ok(()),
        };
    }

    fn finish(self) {
        if let DotSink::Process(mut child) = self {
            drop(child.stdin.take());
            let _ = child.wait();
        }
    }
}

fn open_sink(core: &InterpCore, prefix: &str, name: &str) -> DotSink {
    let base = name.rsplit('/').next().unwrap_or(name).replace('.', "_");
    let cmd = if core.dot_cmd.is_empty() {
        format!("dot -Tdot -o {prefix}{base}.dot")
    } else {
        core.dot_cmd.clone()
    };
    match Command::new("sh")
        .arg("-c")
        .arg(&cmd)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => DotSink::Process(child),
        Err(_) => {
            let path = std::env::temp_dir().join(format!("{prefix}{base}.dot"));
            match std::fs::File::create(path) {
                Ok(file) => DotSink::File(file),
                Err(_) => DotSink::Discard,
            }
        }
    }
}

fn label(unit: &Unit, id: NodeId) -> String {
    let node = unit.node(id);
    let kind = format!("{:?}", node.kind);
    let short = kind.split([' ', '{', '(']).next().unwrap_or("node");
    if node.ident.is_empty() {
        format!("{short}")
    } else {
        format!("{short}\\n{}", node.ident)
    }
}

/// Dumps the annotated AST as a graph description.
pub fn dump_ast(core: &InterpCore, unit: &Unit, root: NodeId, name: &str) {
    let mut sink = open_sink(core, "ast-", name);
    sink.write_all(&format!("digraph ast_{} {{\n", root));
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        sink.write_all(&format!("  n{} [label=\"{}\"];\n", id, label(unit, id)));
        for child in &unit.node(id).children {
            sink.write_all(&format!("  n{} -> n{};\n", id, child));
            stack.push(*child);
        }
    }
    sink.write_all("}\n");
    sink.finish();
}

/// Dumps the CFG: `tnext` edges solid, `fnext` edges dashed.
pub fn dump_cfg(core: &InterpCore, unit: &Unit, root: NodeId, name: &str) {
    let mut sink = open_sink(core, "cfg-", name);
    sink.write_all(&format!("digraph cfg_{} {{\n", root));
    let mut stack = vec![root];
    let mut seen = vec![false; unit.nodes.len()];
    while let Some(id) = stack.pop() {
        if seen[id as usize] {
            continue;
        }
        seen[id as usize] = true;
        let node = unit.node(id);
        if node.start.is_some() || node.tnext.is_some() || node.fnext.is_some() {
            sink.write_all(&format!("  n{} [label=\"{}\"];\n", id, label(unit, id)));
        }
        if let Some(start) = node.start {
            if start != id {
                sink.write_all(&format!("  n{} -> n{} [style=dotted];\n", id, start));
                stack.push(start);
            }
        }
        if let Some(t) = node.tnext {
            sink.write_all(&format!("  n{} -> n{};\n", id, t));
            stack.push(t);
        }
        if let Some(f) = node.fnext {
            sink.write_all(&format!("  n{} -> n{} [style=dashed];\n", id, f));
            stack.push(f);
        }
        for child in &node.children {
            stack.push(*child);
        }
    }
    sink.write_all("}\n");
    sink.finish();
}
