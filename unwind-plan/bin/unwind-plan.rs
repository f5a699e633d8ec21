use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use unwind_plan::{
    compile_image, CfaExpressionPolicy, InstructionExt, PlanTable, Unwinder, UnwinderConfig,
};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Opt {
    /// PID whose unwind plan table to build
    #[arg(short, long)]
    pid: Option<u32>,

    /// Build a table for every mapped image instead of the first one
    #[arg(long, default_value_t = false)]
    all: bool,

    /// Build the table of a single ELF image
    #[arg(short, long, conflicts_with = "pid")]
    file: Option<PathBuf>,

    /// Load bias added to addresses of --file, eg. 0x7f0000000000
    #[arg(long, value_parser = parse_address, default_value = "0")]
    base: u64,

    /// Root of the proc filesystem
    #[arg(long, default_value = "/proc")]
    proc_root: PathBuf,

    /// Fall back to .debug_frame for images without .eh_frame
    #[arg(long, default_value_t = false)]
    debug_frame: bool,

    /// Fail images containing expression-based CFA rules instead of
    /// leaving those ranges out
    #[arg(long, default_value_t = false)]
    reject_cfa_expressions: bool,
}

impl Opt {
    fn config(&self) -> UnwinderConfig {
        UnwinderConfig {
            proc_root: self.proc_root.clone(),
            debug_frame_fallback: self.debug_frame,
            cfa_expressions: if self.reject_cfa_expressions {
                CfaExpressionPolicy::Reject
            } else {
                CfaExpressionPolicy::Omit
            },
        }
    }
}

fn parse_address(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn print_table(table: &PlanTable) {
    for row in table.iter() {
        println!(
            "{:#018x}-{:#018x}\tcfa={}\tra={}",
            row.begin,
            row.end,
            row.frame_base.describe(),
            row.return_address.describe()
        );
    }
}

fn main() -> std::result::Result<(), anyhow::Error> {
    let opt = Opt::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = opt.config();

    if let Some(path) = &opt.file {
        let table = compile_image(path, opt.base, &config)
            .with_context(|| format!("Failed to build unwind table for {}", path.display()))?;
        print_table(&table);
        return Ok(());
    }

    let Some(pid) = opt.pid else {
        bail!("either --pid or --file is required");
    };

    let unwinder = Unwinder::new(config);
    if opt.all {
        let tables = unwinder.unwind_tables_for_pid(pid)?;
        for mapped in &tables {
            println!("# {} ({} rows)", mapped.mapping, mapped.table.len());
            print_table(&mapped.table);
        }
    } else {
        let table = unwinder.unwind_table_for_pid(pid)?;
        print_table(&table);
    }

    Ok(())
}
