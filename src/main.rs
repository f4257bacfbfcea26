mod app;
mod audio;
mod biomarkers;
mod classifier;
mod config;
mod records;
mod store;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use app::{AnalysisRequest, AppError, PipelineEvent, Session};
use config::Config;
use records::{DiagnosisStatus, NewPatient, UserRole};
use store::StoreError;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Choose who is acting (no password check)
    SignIn {
        #[arg(long)]
        email: String,
        /// doctor, patient or researcher
        #[arg(long, default_value = "doctor")]
        role: UserRole,
    },
    SignOut,
    /// Show the signed-in user
    Whoami,
    /// List patients
    Patients {
        /// Case-insensitive name filter
        #[arg(long)]
        filter: Option<String>,
    },
    /// Register a patient
    AddPatient {
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        gender: String,
        #[arg(long, default_value = "Pending")]
        status: DiagnosisStatus,
    },
    /// Classify a voice recording and record the result
    Analyze {
        #[arg(long)]
        patient: String,
        file: PathBuf,
        /// Override the MIME type guessed from the file
        #[arg(long)]
        mime: Option<String>,
    },
    /// List recorded tests
    History {
        #[arg(long)]
        patient: Option<String>,
    },
    /// Show one test in full
    ShowTest { id: String },
    /// Headline figures and recent activity
    Dashboard,
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    /// Store the Gemini API key
    SetKey { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if is_unauthorized(&*e) {
                eprintln!("Unauthorized: researcher accounts are read-only.");
            } else {
                eprintln!("Error: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

fn is_unauthorized(e: &(dyn std::error::Error + 'static)) -> bool {
    matches!(e.downcast_ref::<StoreError>(), Some(StoreError::Unauthorized))
        || matches!(
            e.downcast_ref::<AppError>(),
            Some(AppError::Store(StoreError::Unauthorized))
        )
}

async fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Config(cmd) = command {
        return run_config(cmd);
    }

    let mut session = Session::open(Config::load())?;
    let outcome = dispatch(&mut session, command).await;
    if let Err(e) = session.close() {
        log::warn!("Failed to save records: {e}");
    }
    outcome
}

fn run_config(cmd: ConfigCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ConfigCommand::Show => {
            let config = Config::load();
            println!("config file     {}", Config::path().display());
            println!("data dir        {}", config.data_dir().display());
            println!("api key         {}", config.masked_api_key());
            println!("model           {}", config.model);
            println!("base url        {}", config.base_url);
            println!("timeout         {}s", config.request_timeout_secs);
            println!("model version   {}", config.model_version);
        }
        ConfigCommand::SetKey { key } => {
            let path = Config::path();
            let mut config = Config::load_from(&path);
            config.gemini_api_key = key.trim().to_string();
            config.save_to(&path)?;
            println!("API key saved to {}", path.display());
        }
    }
    Ok(())
}

async fn dispatch(
    session: &mut Session,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::SignIn { email, role } => {
            let user = session.store.sign_in(&email, role)?;
            println!("Signed in as {} ({}), id {}", user.name, user.role, user.id);
        }
        Commands::SignOut => {
            session.store.sign_out()?;
            println!("Signed out");
        }
        Commands::Whoami => match session.store.current_user() {
            Some(user) => println!("{} <{}> ({})", user.name, user.email, user.role),
            None => println!("Not signed in"),
        },
        Commands::Patients { filter } => {
            let patients = session.store.search_patients(filter.as_deref().unwrap_or(""));
            print!("{}", ui::patients::render_patients(&patients));
        }
        Commands::AddPatient {
            name,
            age,
            gender,
            status,
        } => {
            let patient = session.store.add_patient(NewPatient {
                name,
                age,
                gender,
                diagnosis_status: status,
            })?;
            println!("Registered {} as {}", patient.name, patient.id);
        }
        Commands::Analyze {
            patient,
            file,
            mime,
        } => {
            let request = AnalysisRequest {
                patient_id: patient,
                audio: file,
                mime_type: mime,
            };
            analyze(session, &request).await?;
        }
        Commands::History { patient } => {
            let tests = match patient.as_deref() {
                Some(id) => session.store.tests_for_patient(id),
                None => session.store.list_tests().iter().collect(),
            };
            print!("{}", ui::history::render_history(&tests));
        }
        Commands::ShowTest { id } => {
            let test = session
                .store
                .find_test(&id)
                .ok_or_else(|| format!("test {id} not found"))?;
            let patient = session.store.find_patient(&test.patient_id);
            print!("{}", ui::history::render_test_detail(test, patient));
        }
        Commands::Dashboard => {
            print!("{}", ui::dashboard::render_dashboard(&session.store.summary()));
        }
        Commands::Config(cmd) => run_config(cmd)?,
    }
    Ok(())
}

/// Run the analysis pipeline, printing its progress events as they arrive.
async fn analyze(session: &mut Session, request: &AnalysisRequest) -> Result<(), AppError> {
    let (tx, rx) = async_channel::unbounded::<PipelineEvent>();
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            println!("{event}");
        }
    });

    let result = app::run_analysis(session, request, &tx).await;
    drop(tx);
    let _ = printer.await;

    let test = result?;
    let patient = session.store.find_patient(&test.patient_id);
    print!("\n{}", ui::history::render_test_detail(&test, patient));
    Ok(())
}
