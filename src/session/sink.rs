use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use thiserror::Error;
use tracing::{info, warn};

use super::data::Sample;
use crate::push::PushRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server answered {0}")]
    Status(reqwest::StatusCode),
}

/// A destination for parsed samples.
pub trait Sink {
    fn dispatch(&mut self, sample: &Sample) -> Result<(), SinkError>;

    /// Whether the operator asked this sink to stop the run.
    fn quit_requested(&mut self) -> bool {
        false
    }
}

/// How a sample is written as a line of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Comma separated values exactly as sent by the meter
    #[default]
    Raw,
    /// Easy to read by humans
    Pretty,
    /// One JSON object per sample
    Json,
}

impl Format {
    pub fn render(self, sample: &Sample) -> Result<String, SinkError> {
        match self {
            Format::Raw => {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .terminator(csv::Terminator::Any(b'\n'))
                    .from_writer(Vec::new());
                writer.write_record(&sample.raw)?;
                let bytes = writer.into_inner().map_err(|e| e.into_error())?;
                Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
            }
            Format::Pretty => Ok(format!(
                "{:.1} watts, {:.1} volts, {:.3} amps",
                sample.watts, sample.volts, sample.amps
            )),
            Format::Json => Ok(serde_json::to_string(sample)?),
        }
    }
}

/// Writes one rendered line per sample to any writer.
pub struct LineSink<W: Write> {
    writer: W,
    format: Format,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W, format: Format) -> Self {
        LineSink { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl LineSink<Stdout> {
    pub fn stdout(format: Format) -> Self {
        LineSink::new(io::stdout(), format)
    }
}

impl LineSink<File> {
    /// Open `path` for appending, creating it if needed.
    pub fn append(path: &Path, format: Format) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Logging samples to {}", path.display());
        Ok(LineSink::new(file, format))
    }
}

impl<W: Write> Sink for LineSink<W> {
    fn dispatch(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let line = self.format.render(sample)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// File name used by `--save`, e.g. `wattsup_2024-01-31_12-00-00.data`.
pub fn save_file_name() -> PathBuf {
    PathBuf::from(
        chrono::Local::now()
            .format("wattsup_%Y-%m-%d_%H-%M-%S.data")
            .to_string(),
    )
}

/// POSTs each sample, form-encoded the way the meter pushes it.
pub struct NetworkSink {
    client: reqwest::blocking::Client,
    url: String,
    id: String,
}

impl NetworkSink {
    pub fn new(host: &str, port: u16, path: &str, id: &str) -> Result<Self, SinkError> {
        let path = path.trim_start_matches('/');
        let url = format!("http://{}:{}/{}", host, port, path);
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()?;
        info!("Posting samples to {}", url);
        Ok(NetworkSink {
            client,
            url,
            id: id.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Sink for NetworkSink {
    fn dispatch(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let record = PushRecord::from_sample(sample, &self.id);
        let response = self.client.post(&self.url).form(&record).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status));
        }
        Ok(())
    }
}

/// Full-screen live display of the latest sample.
pub struct Dashboard {
    out: Stdout,
    interval: u32,
    elapsed: u64,
    logfile: Option<PathBuf>,
}

impl Dashboard {
    pub fn new(interval: u32, logfile: Option<PathBuf>) -> Result<Self, SinkError> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        leave_raw_mode_on_error(execute!(
            out,
            EnterAlternateScreen,
            Hide,
            Clear(ClearType::All)
        ))?;
        Ok(Dashboard {
            out,
            interval,
            elapsed: 0,
            logfile,
        })
    }

    fn line(&mut self, row: u16, text: String) -> io::Result<()> {
        queue!(self.out, MoveTo(4, row), Print(text))
    }
}

// Screen setup failed before a `Dashboard` exists to restore the terminal.
fn leave_raw_mode_on_error<T>(result: io::Result<T>) -> io::Result<T> {
    if result.is_err() {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("Could not leave raw mode: {}", e);
        }
    }
    result
}

fn current_label(amps: f64) -> String {
    if amps < 1.0 {
        format!("Current: {} mA", (amps * 1000.0).round() as i64)
    } else {
        format!("Current: {:.3} A", amps)
    }
}

impl Sink for Dashboard {
    fn dispatch(&mut self, sample: &Sample) -> Result<(), SinkError> {
        queue!(self.out, Clear(ClearType::All))?;
        if let Some(path) = self.logfile.clone() {
            self.line(2, format!("Logging to file {}", path.display()))?;
        }
        self.line(4, format!("Time:    {} s", self.elapsed))?;
        self.line(5, format!("Power:   {:.1} W", sample.watts))?;
        self.line(6, format!("Voltage: {:.1} V", sample.volts))?;
        self.line(7, current_label(sample.amps))?;
        self.line(9, "Press \"q\" to quit".to_string())?;
        self.out.flush()?;

        self.elapsed += u64::from(self.interval);
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        loop {
            match event::poll(Duration::ZERO) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!("Could not poll terminal events: {}", e);
                    return false;
                }
            }
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return true,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return true;
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(e) => {
                    warn!("Could not read terminal event: {}", e);
                    return false;
                }
            }
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::data::Reply;
    use std::io::{BufRead, BufReader};

    fn sample(line: &str) -> Sample {
        match Reply::parse(line).unwrap() {
            Reply::Data(sample) => sample,
            other => panic!("expected a data record, got {other:?}"),
        }
    }

    fn record(watts: u32) -> String {
        format!("#d,-,18,{watts},1200,40,12,0,0,0,75,1210,62,10,1190,8,100,50,3,600,52;")
    }

    #[test]
    fn raw_format_keeps_meter_fields() {
        let line = Format::Raw.render(&sample(&record(50))).unwrap();
        assert_eq!(line, "50,1200,40,12,0,0,0,75,1210,62,10,1190,8,100,50,3,600,52");
    }

    #[test]
    fn pretty_format_reads_naturally() {
        let line = Format::Pretty.render(&sample(&record(50))).unwrap();
        assert_eq!(line, "5.0 watts, 120.0 volts, 0.040 amps");
    }

    #[test]
    fn json_format_is_one_object() {
        let line = Format::Json.render(&sample(&record(50))).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["watts"], 5.0);
        assert_eq!(value["amps"], 0.04);
    }

    #[test]
    fn line_sink_writes_one_line_per_sample() {
        let mut sink = LineSink::new(Vec::new(), Format::Pretty);
        sink.dispatch(&sample(&record(50))).unwrap();
        sink.dispatch(&sample(&record(75))).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            out,
            "5.0 watts, 120.0 volts, 0.040 amps\n7.5 watts, 120.0 volts, 0.040 amps\n"
        );
    }

    #[test]
    fn file_sink_appends_n_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power.data");
        std::fs::write(&path, "earlier\n").unwrap();

        {
            let mut sink = LineSink::append(&path, Format::Raw).unwrap();
            for watts in [10, 20, 30, 40, 50] {
                sink.dispatch(&sample(&record(watts))).unwrap();
            }
        }

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "earlier");
        for (line, watts) in lines[1..].iter().zip([10, 20, 30, 40, 50]) {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 18);
            assert_eq!(fields[0], watts.to_string());
        }
    }

    #[test]
    fn save_file_name_is_timestamped() {
        let name = save_file_name();
        let name = name.to_str().unwrap();
        assert!(name.starts_with("wattsup_"));
        assert!(name.ends_with(".data"));
        assert_eq!(name.len(), "wattsup_2024-01-31_12-00-00.data".len());
    }

    #[test]
    fn network_sink_builds_url_from_path() {
        let sink = NetworkSink::new("localhost", 8080, "/wattsup", "meter").unwrap();
        assert_eq!(sink.url(), "http://localhost:8080/wattsup");
        let sink = NetworkSink::new("10.0.0.2", 80, "post", "meter").unwrap();
        assert_eq!(sink.url(), "http://10.0.0.2:80/post");
    }

    #[test]
    fn failed_screen_setup_error_is_passed_on() {
        let result: io::Result<()> = Err(io::Error::other("not a terminal"));
        let err = leave_raw_mode_on_error(result).unwrap_err();
        assert_eq!(err.to_string(), "not a terminal");
        assert_eq!(leave_raw_mode_on_error(Ok(7)).unwrap(), 7);
    }

    #[test]
    fn small_currents_shown_in_milliamps() {
        assert_eq!(current_label(0.04), "Current: 40 mA");
        assert_eq!(current_label(1.25), "Current: 1.250 A");
    }
}
