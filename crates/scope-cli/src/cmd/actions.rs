use anyhow::Result;

use crate::instrument;
use crate::output::{print_json, print_table};

pub fn run(tag: Option<&str>, json: bool) -> Result<()> {
    let registry = instrument::registry()?;
    let definitions = match tag {
        Some(tag) => registry.by_tag(tag),
        None => registry.list(),
    };
    let infos: Vec<_> = definitions.iter().map(|d| d.info()).collect();

    if json {
        return print_json(&infos);
    }
    if infos.is_empty() {
        println!("No actions.");
        return Ok(());
    }

    let rows = infos
        .iter()
        .map(|info| {
            let params: Vec<String> = info
                .params
                .iter()
                .map(|p| {
                    if p.required {
                        p.name.clone()
                    } else {
                        format!("[{}]", p.name)
                    }
                })
                .collect();
            vec![
                info.name.clone(),
                serde_json::to_value(info.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                params.join(" "),
                info.tags.join(","),
            ]
        })
        .collect();
    print_table(&["NAME", "KIND", "PARAMS", "TAGS"], rows);
    Ok(())
}
