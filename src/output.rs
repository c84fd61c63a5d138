use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    ClosestResult, LineageResult, ParamsResult, PathResult, PrefetchResult, ProgressEvent,
    ProgressSink,
};
use crate::summary::FeatureSummary;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_lineage(result: &LineageResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_closest(result: &ClosestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_path(result: &PathResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_prefetch(result: &PrefetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_params(result: &ParamsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(result: &FeatureSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Plain-text results on stdout, progress on stderr.
pub struct TextOutput;

impl TextOutput {
    pub fn print_lineage(result: &LineageResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", result.lineage)
    }

    pub fn print_closest(result: &ClosestResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        match &result.proteins {
            Some(choice) => writeln!(stdout, "proteins\t{}\t{}", choice.taxon, choice.location)?,
            None => writeln!(stdout, "proteins\t-\t-")?,
        }
        match &result.hmm {
            Some(choice) => writeln!(stdout, "hmm\t{}\t{}", choice.taxon, choice.location)?,
            None => writeln!(stdout, "hmm\t-\t-")?,
        }
        writeln!(
            stdout,
            "max_intron\t{}\t{}",
            result.intron.max_intron, result.intron.genome_size_threshold
        )
    }

    pub fn print_path(result: &PathResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", result.location)
    }

    pub fn print_prefetch(result: &PrefetchResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        let verb = if result.dry_run { "would sync" } else { "synced" };
        for entry in &result.entries {
            writeln!(stdout, "{verb} {} -> {}", entry.entry, entry.local_path)?;
            if result.dry_run {
                continue;
            }
            writeln!(
                stdout,
                "  downloaded {} ({} bytes), up to date {}, skipped {}",
                entry.report.downloaded,
                entry.report.bytes,
                entry.report.up_to_date,
                entry.report.skipped.len()
            )?;
            for skipped in &entry.report.skipped {
                writeln!(stdout, "  skipped {} ({:?})", skipped.path, skipped.reason)?;
            }
        }
        if let Some(path) = &result.manifest_path {
            writeln!(stdout, "manifest {path}")?;
        }
        Ok(())
    }

    pub fn print_params(result: &ParamsResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        match &result.params_file {
            Some(path) => writeln!(stdout, "{path}"),
            None => {
                let text = serde_yaml::to_string(&result.params).map_err(io::Error::other)?;
                stdout.write_all(text.as_bytes())
            }
        }
    }

    pub fn print_summary(result: &FeatureSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "Statistics for {}", result.gff)?;
        for (kind, count) in &result.counts {
            writeln!(stdout, "{kind:12} {count}")?;
        }
        Ok(())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
