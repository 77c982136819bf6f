//! Check command: compile a snippet without running it.

use rill_core::SnippetPipeline;

use crate::snippet::{self, SnippetArgs};

pub fn execute(args: &SnippetArgs) -> anyhow::Result<()> {
    let config = snippet::load(args)?;
    let result = SnippetPipeline::from_config(&config).compile(&config.code);

    for message in &result.messages {
        eprint!("{}", message.render());
    }

    if !result.was_successful() {
        anyhow::bail!(
            "snippet failed to compile with {} error(s)",
            result.errors().count()
        );
    }

    println!(
        "ok: {} unit(s), {} warning(s)",
        result.units.len(),
        result.messages.len()
    );
    Ok(())
}
