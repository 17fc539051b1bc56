use clap::Subcommand;
use fieldcue_core::Config;
use serde::Serialize;

#[derive(Subcommand)]
pub enum ScenesAction {
    /// List configured scenes
    List,
    /// Show the resolved journey settings of a scene
    Show {
        /// Scene name
        name: String,
    },
}

#[derive(Serialize)]
struct SceneRow<'a> {
    name: &'a str,
    description: &'a str,
    states: Vec<&'a str>,
}

pub fn run(action: ScenesAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    match action {
        ScenesAction::List => {
            let rows: Vec<_> = config
                .scenes
                .iter()
                .map(|scene| SceneRow {
                    name: &scene.name,
                    description: &scene.description,
                    states: scene.states.iter().map(|s| s.name.as_str()).collect(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        ScenesAction::Show { name } => {
            let scene = config.find_scene(&name)?;
            let journey = scene.journey_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&journey)?);
        }
    }
    Ok(())
}
