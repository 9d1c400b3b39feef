use anyhow::Result;
use rustyline::{error::ReadlineError, Editor};
use wavy::{pipeline::Session, Value};

fn main() -> Result<()> {
    if let Err(error) = wavy::logging::init(false) {
        eprintln!("Failed to initialise logging: {}", error);
    }

    println!(
        r"
Welcome to the Wavy programming language REPL!
You may type Wavy code below for evaluation.
Enter 'exit' or press 'CTRL+C' to exit the REPL.
    "
    );

    let mut rl = Editor::<()>::new();
    if rl.load_history("history.txt").is_err() {
        println!("No previous history.");
    }

    let mut session = Session::default();

    loop {
        let readline = rl.readline("> ");
        match readline {
            Ok(line) => match line.trim() {
                "exit" => break,
                "" => continue,
                line => {
                    rl.add_history_entry(line);
                    match session.eval(line) {
                        Ok(Value::Null) => {}
                        Ok(value) => println!("{}", value),
                        Err(error) => eprintln!("{}", error),
                    }
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history("history.txt")?;
    Ok(())
}
