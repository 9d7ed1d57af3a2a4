use std::path::{Path, PathBuf};

use plotters::{
    prelude::{BitMapBackend, IntoDrawingArea, SeriesLabelPosition},
    series::LineSeries,
    style::{Color, ShapeStyle},
};

use crate::{
    charts::theme,
    constants::CHART_IMAGE_FORMAT,
    error::{Error, Result},
    history::returns::ReturnsTable,
};

fn chart_error(error: impl std::fmt::Display) -> Error {
    Error::Chart(error.to_string())
}

/// Draws every column of `table` as one line and writes `{dir}/{name}.png`.
///
/// Returns `None` without touching the disk when the table has no finite value.
pub fn returns_chart(
    dir: &Path,
    name: &str,
    title: &str,
    table: &ReturnsTable,
) -> Result<Option<PathBuf>> {
    let path = dir.join(format!("{name}.{CHART_IMAGE_FORMAT}"));

    let all_values: Vec<f64> = table
        .columns
        .iter()
        .flat_map(|column| column.values.iter().copied())
        .filter(|value| value.is_finite())
        .collect();
    if all_values.is_empty() {
        return Ok(None);
    }

    draw_returns(&path, title, table, &all_values)?;
    Ok(Some(path))
}

fn draw_returns(path: &Path, title: &str, table: &ReturnsTable, all_values: &[f64]) -> Result<()> {
    let root = BitMapBackend::new(path, (2560, 780)).into_drawing_area();
    root.fill(&theme::BASE).map_err(chart_error)?;

    let colors = [
        &theme::BLUE,
        &theme::GREEN,
        &theme::RED,
        &theme::YELLOW,
        &theme::MAUVE,
        &theme::PEACH,
        &theme::TEAL,
    ];

    let y_min = all_values.iter().cloned().fold(f64::INFINITY, f64::min);
    let y_max = all_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let y_range = (y_max - y_min).max(0.01);
    let y_min = y_min - y_range * 0.05;
    let y_max = y_max + y_range * 0.05;
    let x_max = table
        .columns
        .iter()
        .map(|column| column.values.len())
        .max()
        .unwrap_or(1) as u32;

    let mut chart = plotters::chart::ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20, &theme::TEXT))
        .margin(5)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0..x_max, y_min..y_max)
        .map_err(chart_error)?;

    chart
        .configure_mesh()
        .label_style(("sans-serif", 15, &theme::TEXT))
        .axis_style(theme::SURFACE1)
        .light_line_style(theme::SURFACE0)
        .x_desc("step")
        .y_desc("return")
        .draw()
        .map_err(chart_error)?;

    for (i, column) in table.columns.iter().enumerate() {
        let color = colors[i % colors.len()].mix(0.8);
        chart
            .draw_series(LineSeries::new(
                column
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(idx, v)| (idx as u32, *v)),
                ShapeStyle::from(&color).stroke_width(1),
            ))
            .map_err(chart_error)?
            .label(column.label.as_str())
            .legend(move |(x, y)| {
                plotters::element::Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.filled())
            });
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(theme::SURFACE0.mix(0.7))
        .border_style(theme::SURFACE1)
        .label_font(("sans-serif", 14, &theme::TEXT))
        .draw()
        .map_err(chart_error)?;

    root.present().map_err(chart_error)?;

    Ok(())
}
