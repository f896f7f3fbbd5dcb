use crate::args::ConfigCommands;
use eden_cli::{ConfigStore, EdenPaths};

pub(crate) fn cmd_config(paths: &EdenPaths, command: ConfigCommands) -> anyhow::Result<()> {
    let store = ConfigStore::new(paths.clone());
    match command {
        ConfigCommands::Get { key } => println!("{}", store.get_value(&key)?),
        ConfigCommands::Show => {
            for section in store.load()?.sections() {
                println!("[{}]", section.name());
                for (key, value) in section.entries() {
                    println!("{key}={value}");
                }
            }
        }
    }
    Ok(())
}
