use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use tagwire::{decode_to_json, ParseOptions, Root, SchemaError};

#[derive(Parser)]
#[command(name = "tagw")]
#[command(about = "Compile, encode, decode or verify tagwire schemas and messages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a `.proto` schema to a JSON descriptor
    Compile {
        /// Input `.proto` file
        #[arg(short, long)]
        input: PathBuf,

        /// Output `.json` file (defaults to same name + `.json`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encode a plain JSON object against a schema type
    Encode {
        /// Schema file (`.proto` or JSON descriptor)
        #[arg(short, long)]
        schema: PathBuf,

        /// Fully qualified message type
        #[arg(short, long)]
        r#type: String,

        /// Input JSON file holding the plain object
        #[arg(short, long)]
        input: PathBuf,

        /// Output binary file (defaults to same name + `.bin`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode an encoded message to JSON (printed to stdout)
    Decode {
        /// Schema file (`.proto` or JSON descriptor)
        #[arg(short, long)]
        schema: PathBuf,

        /// Fully qualified message type
        #[arg(short, long)]
        r#type: String,

        /// Input binary file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Verify a plain JSON object against a schema type
    Verify {
        /// Schema file (`.proto` or JSON descriptor)
        #[arg(short, long)]
        schema: PathBuf,

        /// Fully qualified message type
        #[arg(short, long)]
        r#type: String,

        /// Input JSON file holding the plain object
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// Load a schema from disk; JSON descriptors by extension, `.proto` text
/// with filesystem import resolution otherwise.
fn load_schema_file(path: &Path) -> Result<Root, SchemaError> {
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let text = fs::read_to_string(path)?;
        Root::from_json_text(&text)
    } else {
        Root::load_file(path, &ParseOptions::default())
    }
}

fn main() -> Result<(), SchemaError> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Compile { input, output } => {
            let root = Root::load_file(input, &ParseOptions::default())?;
            let descriptor = serde_json::to_string_pretty(&root.to_json()).unwrap();
            let out_path = if let Some(o) = output {
                o.clone()
            } else {
                let mut p = input.clone();
                p.set_extension("json");
                p
            };
            fs::write(&out_path, descriptor)?;
            println!("Compiled {} → {}", input.display(), out_path.display());
            Ok(())
        }

        Commands::Encode {
            schema,
            r#type,
            input,
            output,
        } => {
            let root = load_schema_file(schema)?;
            let text = fs::read_to_string(input)?;
            let object: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| SchemaError::Descriptor(format!("invalid JSON input: {}", e)))?;
            if let Some(problem) = root.verify(r#type, &object) {
                return Err(SchemaError::Descriptor(problem));
            }
            let message = root.from_object(r#type, &object)?;
            let bytes = root.encode(&message)?;
            let out_path = if let Some(o) = output {
                o.clone()
            } else {
                let mut p = input.clone();
                p.set_extension("bin");
                p
            };
            fs::write(&out_path, &bytes)?;
            println!(
                "Encoded {} as {} → {} ({} bytes)",
                input.display(),
                r#type,
                out_path.display(),
                bytes.len()
            );
            Ok(())
        }

        Commands::Decode {
            schema,
            r#type,
            input,
        } => {
            let root = load_schema_file(schema)?;
            let data = fs::read(input)?;
            let json = decode_to_json(&root, r#type, &data)?;
            println!("{}", json);
            Ok(())
        }

        Commands::Verify {
            schema,
            r#type,
            input,
        } => {
            let root = load_schema_file(schema)?;
            let text = fs::read_to_string(input)?;
            let object: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| SchemaError::Descriptor(format!("invalid JSON input: {}", e)))?;
            match root.verify(r#type, &object) {
                None => {
                    println!("{} is a valid {}", input.display(), r#type);
                    Ok(())
                }
                Some(problem) => Err(SchemaError::Descriptor(problem)),
            }
        }
    }
}
