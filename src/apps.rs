use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, error::ErrorKind};
use indexmap::IndexMap;
use serde_json::{Value, json};

use crate::aggregate::aggregate_sequential;
use crate::config::EngineConfig;
use crate::constants::apps::{OUTPUT_AGGREGATED_KEY, OUTPUT_BYPASS_KEY};
use crate::filter::{FilterOptions, filter_results};
use crate::index::TagIndex;
use crate::metrics::ClusterSizes;
use crate::rating::RatingIndex;
use crate::result::ResultDict;
use crate::tags::{TagSet, normalize_tag_value, parse_tag_arg};
use crate::types::{RecordId, TagName, TagValue};

#[derive(Debug, Parser)]
#[command(
    name = "aggregate_results",
    disable_help_subcommand = true,
    about = "Pool result records across tags",
    long_about = "Load result records, drop observations excluded by QC ratings, then pool them across each tag in turn.",
    after_help = "Across tags default to the configured order (dir, run, ses, task). Exclude files may be glob patterns."
)]
struct AggregateResultsCli {
    #[arg(long, value_name = "PATH", help = "JSON array of result records")]
    input: PathBuf,
    #[arg(
        long = "across",
        value_name = "TAG",
        help = "Tag to pool across, repeat to aggregate in order"
    )]
    across: Vec<TagName>,
    #[arg(
        long = "exclude-file",
        value_name = "PATH",
        help = "QC rating file or glob pattern, repeat as needed"
    )]
    exclude_files: Vec<PathBuf>,
    #[arg(long, help = "Exclude observations that have no rating")]
    strict: bool,
    #[arg(long, value_name = "PATH", help = "Optional JSON engine configuration")]
    config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Write aggregated and bypassed records here instead of stdout"
    )]
    output: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(
    name = "qc_decide",
    disable_help_subcommand = true,
    about = "Decide whether an observation passes QC",
    long_about = "Load QC rating files and print the include/exclude decision for one tag set."
)]
struct QcDecideCli {
    #[arg(
        long = "exclude-file",
        value_name = "PATH",
        required = true,
        help = "QC rating file or glob pattern, repeat as needed"
    )]
    exclude_files: Vec<PathBuf>,
    #[arg(
        long = "tag",
        value_name = "NAME=VALUE",
        value_parser = parse_tag_arg,
        help = "Tag of the observation, repeat as needed"
    )]
    tags: Vec<(TagName, TagValue)>,
    #[arg(long, help = "Exclude observations that have no rating")]
    strict: bool,
}

#[derive(Debug, Parser)]
#[command(
    name = "associations",
    disable_help_subcommand = true,
    about = "Find files associated with a record",
    long_about = "Index tagged records and list the records associated with one of them, narrowed by entity priority."
)]
struct AssociationsCli {
    #[arg(
        long,
        value_name = "PATH",
        help = "JSON object mapping record ids to tag objects"
    )]
    records: PathBuf,
    #[arg(long, value_name = "ID", help = "Record to resolve associations for")]
    record: RecordId,
    #[arg(
        long = "filter",
        value_name = "NAME=VALUE",
        value_parser = parse_tag_arg,
        help = "Mandatory tag of associated records, repeat as needed"
    )]
    filters: Vec<(TagName, TagValue)>,
    #[arg(long, value_name = "PATH", help = "Optional JSON engine configuration")]
    config: Option<PathBuf>,
}

/// Filter, pool and write result records; backs the `aggregate_results` demo.
pub fn run_aggregate_results<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();

    let Some(cli) = parse_cli::<AggregateResultsCli, _>(
        std::iter::once("aggregate_results".to_string()).chain(args_iter),
    )?
    else {
        return Ok(());
    };

    let mut config = load_config(cli.config.as_deref())?;
    if !cli.across.is_empty() {
        config.aggregate.across_order = cli.across;
    }
    config.qc.exclude_files.extend(cli.exclude_files);
    config.qc.strict |= cli.strict;

    let results: Vec<ResultDict> = serde_json::from_str(&fs::read_to_string(&cli.input)?)?;
    let loaded = results.len();

    let ratings = if config.qc.exclude_files.is_empty() {
        None
    } else {
        Some(RatingIndex::from_config(&config.qc)?)
    };
    let options = FilterOptions {
        exclude: ratings.as_ref(),
        ..FilterOptions::default()
    };
    let results = filter_results(results, &options)?;
    println!("records: loaded={} after_qc={}", loaded, results.len());

    let output = aggregate_sequential(results, &config.aggregate)?;
    for (across_key, sizes) in &output.steps {
        print_cluster_sizes(across_key, sizes);
    }
    println!(
        "aggregated={} bypass={}",
        output.aggregated.len(),
        output.bypass.len()
    );

    let document = json!({
        OUTPUT_AGGREGATED_KEY: output.aggregated,
        OUTPUT_BYPASS_KEY: output.bypass,
    });
    match &cli.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, &document)?;
            writer.flush()?;
            println!("wrote {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &document)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

/// Print the QC decision for one tag set.
pub fn run_qc_decide<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();

    let Some(cli) =
        parse_cli::<QcDecideCli, _>(std::iter::once("qc_decide".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let ratings = RatingIndex::from_files(&cli.exclude_files)?.with_strict(cli.strict);
    let tags = TagSet::from_pairs(cli.tags);
    let decision = ratings.decide(&tags);
    println!("{decision}");
    Ok(())
}

/// Print the records associated with `--record`.
pub fn run_associations<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();

    let Some(cli) =
        parse_cli::<AssociationsCli, _>(std::iter::once("associations".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let config = load_config(cli.config.as_deref())?;
    let raw: IndexMap<RecordId, IndexMap<TagName, Value>> =
        serde_json::from_str(&fs::read_to_string(&cli.records)?)?;

    let mut index = TagIndex::with_config(&config.index);
    for (id, tags) in raw {
        let mut pairs = Vec::with_capacity(tags.len());
        for (name, value) in &tags {
            pairs.push((name.clone(), normalize_tag_value(name, value)?));
        }
        index.add(id, TagSet::from_pairs(pairs));
    }
    if index.tags(&cli.record).is_none() {
        return Err(format!("record '{}' is not indexed", cli.record).into());
    }

    let filters = cli
        .filters
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()));
    match index.associations(&cli.record, filters) {
        Some(ids) => {
            for id in ids {
                println!("{id}");
            }
        }
        None => println!("none"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

fn print_cluster_sizes(across_key: &str, sizes: &ClusterSizes) {
    println!("--- clusters across \"{across_key}\" ---");
    for cluster in &sizes.per_cluster {
        let key = if cluster.key.is_empty() {
            "(all)"
        } else {
            cluster.key.as_str()
        };
        println!("{key}: size={} share={:.2}", cluster.size, cluster.share);
    }
    println!(
        "clusters={} singletons={} elements={} min={} max={} mean={:.2}",
        sizes.clusters, sizes.singletons, sizes.elements, sizes.min, sizes.max, sizes.mean
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_arguments_parse_into_pairs() {
        let cli = parse_cli::<QcDecideCli, _>([
            "qc_decide",
            "--exclude-file",
            "exclude.json",
            "--tag",
            "sub=01",
            "--tag",
            "task=rest",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(cli.tags.len(), 2);
        assert_eq!(cli.tags[0], ("sub".to_string(), "01".to_string()));
    }

    #[test]
    fn malformed_tag_argument_is_an_error() {
        let result =
            parse_cli::<QcDecideCli, _>(["qc_decide", "--exclude-file", "x.json", "--tag", "sub"]);
        assert!(result.is_err());
    }

    #[test]
    fn help_is_not_an_error() {
        let result = parse_cli::<AggregateResultsCli, _>(["aggregate_results", "--help"]);
        assert!(matches!(result, Ok(None)));
    }
}
