use clap::Parser;
use formula_calc::{CalcOptions, Calculator};
use serde_json::{json, Value};

/// Evaluate a formula against JSON bind data.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Formula, e.g. "price * (1 + vat)"
    expression: String,
    /// Bind data as a JSON object; nested levels bind as dotted names
    #[arg(long)]
    data: Option<String>,
    /// Treat variable names case-sensitively
    #[arg(long)]
    case_sensitive: bool,
    /// Assume the bind data contains no nested objects
    #[arg(long)]
    ignore_nested: bool,
    /// Print the unresolved variables of the expression instead of a result
    #[arg(long)]
    deps: bool,
    /// Enable debug logging
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let data: Value = match args.data.as_deref() {
        Some(text) => match serde_json::from_str(text) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => {
                eprintln!("--data must be a JSON object");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Invalid JSON in --data: {e}");
                std::process::exit(1);
            }
        },
        None => json!({}),
    };

    let mut calc = Calculator::with_options(CalcOptions {
        case_sensitive: args.case_sensitive,
        ignore_nested: args.ignore_nested,
        ..CalcOptions::default()
    });

    if args.deps {
        calc.store(&data);
        match calc.dependencies(args.expression.as_str()) {
            Ok(names) => println!("{}", serde_json::to_string(&names).unwrap_or_default()),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
        return;
    }

    match calc.evaluate_strict(args.expression.as_str(), &data) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
