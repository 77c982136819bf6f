//! Classpath command: print what the compiler would see.

use std::ffi::OsString;

use rill_core::VirtualClasspath;
use rill_core::compile::CLASSPATH_ENV;

pub fn execute(classpath: Option<&str>, package: Option<&str>, recursive: bool) -> anyhow::Result<()> {
    let raw: OsString = match classpath {
        Some(classpath) => classpath.into(),
        None => std::env::var_os(CLASSPATH_ENV).unwrap_or_default(),
    };

    let view = VirtualClasspath::new(&raw).with_filter(package, recursive)?;
    let mut count = 0;
    for entry in &view {
        let entry = entry?;
        println!("{:<8} {}", format!("{:?}", entry.kind()).to_lowercase(), entry.uri());
        count += 1;
    }
    view.close();

    tracing::info!(
        "Listed {} entries from {} segment(s)",
        count,
        view.segments().len()
    );
    Ok(())
}
