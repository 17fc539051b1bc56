use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use fieldcue_core::{
    AudioOutput, Config, DebriefForm, DebriefRoute, DirectoryClipStore, EventBridge, EventSink,
    HostRoute, Journey, JourneyConfig, JourneyRecorder, JourneyRunner, JourneyServices, RawEvent,
    SimulatedOutput, SqliteJourneyStore,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::warn;

type Error = Box<dyn std::error::Error>;

#[derive(Args)]
pub struct RunArgs {
    /// Scene name
    pub scene: String,
    /// Pretend to play clips instead of using the audio device
    #[arg(long)]
    pub simulate: bool,
    /// Length of a simulated clip in milliseconds
    #[arg(long, default_value_t = 1_500, requires = "simulate")]
    pub clip_ms: u64,
    /// Fixed seed for random playback
    #[arg(long)]
    pub seed: Option<u64>,
}

fn audio_output(args: &RunArgs) -> Result<Arc<dyn AudioOutput>, Error> {
    if args.simulate {
        return Ok(Arc::new(SimulatedOutput::new(Duration::from_millis(
            args.clip_ms,
        ))));
    }
    #[cfg(feature = "rodio")]
    {
        Ok(Arc::new(fieldcue_core::RodioOutput::new()))
    }
    #[cfg(not(feature = "rodio"))]
    {
        Err("built without audio support; use --simulate".into())
    }
}

/// Start a journey and block until it has been recorded.
///
/// Each stdin line is a peripheral event (`single`, `double`, `long` or
/// their first letters). Closing stdin aborts the journey.
pub fn run(args: RunArgs) -> Result<(), Error> {
    let config = Config::load()?;
    let scene = config.find_scene(&args.scene)?;
    let journey_config = scene.journey_config(&config)?;

    let clips = Arc::new(DirectoryClipStore::new(config.audio_root()?));
    let store = Arc::new(SqliteJourneyStore::open()?);
    let mut services = JourneyServices::new(audio_output(&args)?, clips, store.clone());
    if let Some(seed) = args.seed {
        services = services.with_seed(seed);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(drive(&config, journey_config, services, store));
    // A stdin read may still be parked on a blocking thread.
    runtime.shutdown_background();
    result
}

async fn drive(
    config: &Config,
    journey_config: JourneyConfig,
    services: JourneyServices,
    store: Arc<SqliteJourneyStore>,
) -> Result<(), Error> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let services = services.with_events(EventSink::new(event_tx));
    let (runner, handle) = JourneyRunner::new(journey_config, services)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to encode event"),
            }
        }
    });

    let (raw_tx, raw_rx) = mpsc::channel(32);
    let pump = tokio::spawn(EventBridge::new(handle).pump(raw_rx));
    let mut journey = tokio::spawn(runner.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut raw_tx = Some(raw_tx);
    let route = loop {
        tokio::select! {
            route = &mut journey => break route?,
            line = lines.next_line(), if raw_tx.is_some() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Some(tx) = &raw_tx {
                        let _ = tx.send(RawEvent::now(line.trim())).await;
                    }
                }
                // Dropping the sender ends the bridge, which aborts the journey.
                None => raw_tx = None,
            },
        }
    };
    drop(raw_tx);
    pump.await?;
    printer.await?;

    let journey = match route {
        HostRoute::Idle { journey, recorded } => {
            if !recorded {
                return Err("journey finished but could not be recorded".into());
            }
            journey
        }
        HostRoute::Debrief(route) => {
            let form = config.debrief_form(route.debrief_id()).cloned();
            debrief(route, form, &mut lines, store.as_ref()).await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&journey)?);
    Ok(())
}

/// Ask each question on stderr, re-asking on invalid answers. End of
/// input dismisses the form.
async fn debrief(
    route: DebriefRoute,
    form: Option<DebriefForm>,
    lines: &mut Lines<BufReader<Stdin>>,
    recorder: &dyn JourneyRecorder,
) -> Result<Journey, Error> {
    let Some(form) = form else {
        warn!(debrief = %route.debrief_id(), "debrief form not configured, dismissing");
        return Ok(route.dismiss(recorder)?);
    };

    eprintln!("== {} ==", form.title);
    let mut answers = Vec::with_capacity(form.questions.len());
    for question in &form.questions {
        loop {
            eprint!("{}: ", question.prompt);
            let Some(raw) = lines.next_line().await? else {
                eprintln!();
                return Ok(route.dismiss(recorder)?);
            };
            match question.normalize(&raw) {
                Ok(_) => {
                    answers.push(raw);
                    break;
                }
                Err(message) => eprintln!("  {message}"),
            }
        }
    }

    let log = form.answer(&answers)?;
    Ok(route.submit(log, recorder)?)
}
