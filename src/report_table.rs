use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::analysis::{Analysis, Extras};
use crate::news::Article;

fn fmt_value(v: Option<f64>) -> String {
    v.map_or_else(String::new, |v| format!("{:.2}", v))
}

/// Latest `rows` bars with one column per computed indicator.
pub fn bars_table(analysis: &Analysis, rows: usize) -> Table {
    let mut header = vec![
        Cell::new("Date").add_attribute(Attribute::Bold),
        Cell::new("Open").add_attribute(Attribute::Bold),
        Cell::new("High").add_attribute(Attribute::Bold),
        Cell::new("Low").add_attribute(Attribute::Bold),
        Cell::new("Close").add_attribute(Attribute::Bold),
        Cell::new("Volume")
            .add_attribute(Attribute::Bold)
            .set_alignment(CellAlignment::Right),
    ];
    header.extend(
        analysis
            .frame
            .columns()
            .iter()
            .map(|c| Cell::new(c.name).add_attribute(Attribute::Bold)),
    );

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);

    let bars = analysis.series.bars();
    let start = bars.len().saturating_sub(rows);
    for (i, bar) in bars.iter().enumerate().skip(start) {
        let change_color = match i.checked_sub(1).map(|p| bars[p].close) {
            Some(prev) if bar.close > prev => Color::Green,
            Some(prev) if bar.close < prev => Color::Red,
            _ => Color::Reset,
        };

        let mut row = vec![
            Cell::new(bar.date.format("%d-%m-%Y")).fg(Color::DarkGrey),
            Cell::new(format!("{:.2}", bar.open)),
            Cell::new(format!("{:.2}", bar.high)),
            Cell::new(format!("{:.2}", bar.low)),
            Cell::new(format!("{:.2}", bar.close)).fg(change_color),
            Cell::new(bar.volume).set_alignment(CellAlignment::Right),
        ];
        row.extend(
            analysis
                .frame
                .columns()
                .iter()
                .map(|c| Cell::new(fmt_value(c.values.get(i).copied().flatten())).fg(Color::Cyan)),
        );
        table.add_row(row);
    }
    table
}

pub fn fundamentals_table(extras: &Extras) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Fundamental").add_attribute(Attribute::Bold),
            Cell::new("Value")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);
    for (label, value) in extras.fundamentals.rows() {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn news_table(articles: &[Article]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Headline").add_attribute(Attribute::Bold),
            Cell::new("Link").add_attribute(Attribute::Bold),
        ]);
    for article in articles {
        let mut headline = article.title.clone();
        if let Some(desc) = article.description.as_deref().filter(|d| !d.is_empty()) {
            headline.push('\n');
            headline.push_str(desc);
        }
        table.add_row(vec![
            Cell::new(headline),
            Cell::new(&article.url).fg(Color::Blue),
        ]);
    }
    table
}

/// `SMA 22.50 · RSI n/a · ...` for the last bar; `n/a` while still warming up.
fn latest_summary(analysis: &Analysis) -> String {
    analysis
        .frame
        .columns()
        .iter()
        .map(|c| {
            let value = analysis
                .frame
                .latest(c.name)
                .map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v));
            format!("{} {}", c.name, value)
        })
        .collect::<Vec<_>>()
        .join(" · ")
}

/// Full one-shot report printed by the `show` command.
pub fn render_report(analysis: &Analysis, extras: &Extras, rows: usize) -> String {
    let series = &analysis.series;
    if series.is_empty() {
        return format!(
            "\nNo data for {} over {}. Check the ticker (e.g. PETR4.SA).\n",
            series.ticker(),
            series.period()
        );
    }

    let mut out = format!(
        "\n{} · {} ({} trading days)\n{}\n",
        series.ticker(),
        series.period(),
        series.len(),
        bars_table(analysis, rows)
    );

    if let Some(last) = series.last() {
        out.push_str(&format!(
            "Last close {:.2} on {}\n",
            last.close,
            last.date.format("%d-%m-%Y")
        ));
    }
    if !analysis.frame.is_empty() {
        out.push_str(&format!("Latest: {}\n", latest_summary(analysis)));
    }

    out.push_str(&format!("\n{}\n", fundamentals_table(extras)));

    match &analysis.forecast {
        Some(f) => {
            let score = f
                .r_squared
                .map_or_else(|| "n/a".to_string(), |r| format!("{:.2}%", r * 100.0));
            out.push_str(&format!(
                "\nNaive trend line for {}: {:.2} (R² on held-out days: {})\n",
                f.target_date.format("%d-%m-%Y"),
                f.predicted_close,
                score
            ));
        }
        None => out.push_str("\nNot enough history for a trend line.\n"),
    }

    match &extras.news {
        Some(articles) if !articles.is_empty() => {
            out.push_str(&format!("\n{}\n", news_table(articles)));
        }
        _ => out.push_str("\nNo news available right now.\n"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bar, IndicatorSelection, Period, Series};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn analysis(n: u64, selection: &str) -> Analysis {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let bars = (0..n)
            .map(|i| Bar {
                date: start + chrono::Days::new(i),
                open: 20.0,
                high: 21.0,
                low: 19.0,
                close: 20.0 + (i % 3) as f64,
                volume: 42,
            })
            .collect();
        let series = Arc::new(Series::new("ITUB4.SA", Period::OneMonth, bars));
        Analysis::compute(series, &IndicatorSelection::parse_list(selection).unwrap())
    }

    #[test]
    fn bars_table_shows_latest_rows_only() {
        let a = analysis(30, "sma,rsi");
        let rendered = bars_table(&a, 5).to_string();

        assert!(rendered.contains("SMA") && rendered.contains("RSI"));
        assert!(rendered.contains("30-04-2024"));
        assert!(!rendered.contains("25-04-2024"));
    }

    #[test]
    fn empty_series_reports_no_data() {
        let series = Arc::new(Series::empty("ZZZZ9.SA", Period::OneMonth));
        let a = Analysis::compute(series, &IndicatorSelection::none());
        let text = render_report(&a, &Extras::default(), 10);
        assert!(text.contains("No data for ZZZZ9.SA"));
    }

    #[test]
    fn report_summarizes_last_bar_and_latest_indicators() {
        // 30 bars: SMA and MACD are defined on the last one, Signal is still warming up
        let a = analysis(30, "sma,macd");
        let text = render_report(&a, &Extras::default(), 3);

        assert!(text.contains("Last close 22.00 on 30-04-2024"));
        let sma = a.frame.latest("SMA").unwrap();
        let macd = a.frame.latest("MACD").unwrap();
        assert!(text.contains(&format!("SMA {:.2}", sma)));
        assert!(text.contains(&format!("MACD {:.2}", macd)));
        assert!(text.contains("Signal n/a"));
    }

    #[test]
    fn report_without_indicators_has_no_latest_line() {
        let text = render_report(&analysis(30, ""), &Extras::default(), 3);
        assert!(!text.contains("Latest:"));
    }

    #[test]
    fn report_mentions_missing_news() {
        let a = analysis(30, "");
        let text = render_report(&a, &Extras::default(), 3);
        assert!(text.contains("No news available"));
        assert!(text.contains("N/A"));
    }
}
