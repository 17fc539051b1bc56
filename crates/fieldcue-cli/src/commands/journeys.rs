use clap::Subcommand;
use fieldcue_core::SqliteJourneyStore;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum JourneysAction {
    /// List recorded journeys, newest first
    List {
        /// Maximum number of journeys to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one journey with its state logs and debrief answers
    Show {
        /// Journey id
        id: Uuid,
    },
    /// Delete a journey
    Delete {
        /// Journey id
        id: Uuid,
    },
}

pub fn run(action: JourneysAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteJourneyStore::open()?;

    match action {
        JourneysAction::List { limit } => {
            let rows = store.list(limit)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        JourneysAction::Show { id } => match store.get(id)? {
            Some(journey) => println!("{}", serde_json::to_string_pretty(&journey)?),
            None => return Err(format!("journey not found: {id}").into()),
        },
        JourneysAction::Delete { id } => {
            if store.delete(id)? {
                println!("deleted {id}");
            } else {
                return Err(format!("journey not found: {id}").into());
            }
        }
    }
    Ok(())
}
