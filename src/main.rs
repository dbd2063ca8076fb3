//! docbind – command-line template binder.
//!
//! Usage:
//!   docbind <template.html> [output.html] --record <record.json> --map <map.json>
//!   docbind --restore <bound.html> [output.html]
//!
//! If `output.html` is omitted the result is written next to the input file
//! with a `.bound.html` (or `.restored.html`) suffix.

use std::{env, fs, path::PathBuf, process};

use docbind::pipeline::{bind_document, restore_for_storage, BindConfig};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut input_path: Option<PathBuf> = None;
    let mut output_path: Option<PathBuf> = None;
    let mut record_path: Option<PathBuf> = None;
    let mut map_path: Option<PathBuf> = None;
    let mut title: Option<String> = None;
    let mut padding: Option<String> = None;
    let mut restore = false;
    let mut paginate = true;
    let mut positional = 0usize;

    let mut iter = args.iter().skip(1).peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--restore" => restore = true,
            "--no-paginate" => paginate = false,
            "--record" | "-r" => record_path = iter.next().map(PathBuf::from),
            "--map" | "-m" => map_path = iter.next().map(PathBuf::from),
            "--title" | "-t" => title = iter.next().cloned(),
            "--padding" | "-p" => padding = iter.next().cloned(),
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown flag: {other}");
                print_usage(&args[0]);
                process::exit(1);
            }
            path => {
                if positional == 0 {
                    input_path = Some(PathBuf::from(path));
                } else if positional == 1 {
                    output_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("Unexpected argument: {path}");
                    print_usage(&args[0]);
                    process::exit(1);
                }
                positional += 1;
            }
        }
    }

    let input = match input_path {
        Some(p) => p,
        None => {
            eprintln!("Error: no input file specified.");
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    let html = match fs::read_to_string(&input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {e}", input.display());
            process::exit(1);
        }
    };

    if restore {
        let output = output_path.unwrap_or_else(|| derived_output(&input, "restored.html"));
        let restored = restore_for_storage(&html);
        write_output(&output, &restored);
        eprintln!("Wrote '{}'", output.display());
        return;
    }

    let record_json = match record_path {
        Some(p) => read_or_exit(&p),
        None => {
            eprintln!("Error: --record is required (or use --restore).");
            print_usage(&args[0]);
            process::exit(1);
        }
    };
    let map_json = match map_path {
        Some(p) => read_or_exit(&p),
        None => {
            eprintln!("Error: --map is required (or use --restore).");
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    // Default title: stem of the input filename.
    let default_title = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("docbind output")
        .to_string();

    let config = BindConfig {
        title: title.unwrap_or(default_title),
        page_padding: padding.unwrap_or_else(|| BindConfig::default().page_padding),
        paginate,
    };

    match bind_document(&html, &record_json, &map_json, &config) {
        Ok(doc) => {
            let output = output_path.unwrap_or_else(|| derived_output(&input, "bound.html"));
            let rendered = doc.to_html();
            write_output(&output, &rendered);
            let pages = doc.page_count();
            eprintln!(
                "Wrote '{}' ({} page{})",
                output.display(),
                pages,
                if pages == 1 { "" } else { "s" }
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn derived_output(input: &PathBuf, extension: &str) -> PathBuf {
    let mut o = input.clone();
    o.set_extension(extension);
    o
}

fn read_or_exit(path: &PathBuf) -> String {
    match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {e}", path.display());
            process::exit(1);
        }
    }
}

fn write_output(path: &PathBuf, content: &str) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Error creating output directory: {e}");
                process::exit(1);
            }
        }
    }
    if let Err(e) = fs::write(path, content) {
        eprintln!("Error writing '{}': {e}", path.display());
        process::exit(1);
    }
}

fn print_usage(prog: &str) {
    eprintln!(
        "Usage:\n  \
         {prog} <template.html> [output.html] --record <record.json> --map <map.json>\n  \
         {prog} --restore <bound.html> [output.html]\n\
         \n\
         Options:\n  \
         -r, --record <file>   record JSON ({{\"recordId\": ..., \"fields\": {{...}}}})\n  \
         -m, --map <file>      field map JSON ({{\"Display Name\": \"fieldId\", ...}})\n  \
         -t, --title <text>    document title (default: input file stem)\n  \
         -p, --padding <len>   page padding, e.g. 10mm / 1cm / 0.5in\n  \
         --no-paginate         skip automatic page breaking\n  \
         --restore             strip live-mapping artifacts instead of binding\n  \
         -h, --help            show this help"
    );
}
