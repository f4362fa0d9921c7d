use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use eframe::egui;
use egui_extras::{Column, TableBuilder};
use image::DynamicImage;

use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, RequestKind, Results};
use crate::error::{Error, StateError, ValidationError};
use crate::leads::CANONICAL_LEAD_ORDER;
use crate::mapper::{initial_selection, to_display, DisplayRect, PixelBox, ScaleRatio};
use crate::payload::{assemble, PatientMetadata, Sex, SourceImage, MIN_SCALE_FACTOR};
use crate::preview::render_preview;
use crate::report::{export_report, ReportPaths};
use crate::service::{ConvertedRecord, HttpEcgServices};
use crate::session::{AnnotationSession, SessionEvent, SessionOutcome};

const CAPTURED_COLOR: egui::Color32 = egui::Color32::from_rgb(40, 200, 90);
const SELECTION_COLOR: egui::Color32 = egui::Color32::from_rgb(255, 200, 40);
const TRACE_COLOR: egui::Color32 = egui::Color32::from_rgb(120, 190, 255);
const PREVIEW_STRIP_HEIGHT: f32 = 90.0;
const PREVIEW_LABEL_WIDTH: f32 = 40.0;

// ── Interaction State ───────────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum DragState {
    None,
    Drawing { start: egui::Pos2 },
    Moving,
}

#[derive(Clone, Debug)]
enum Status {
    Idle,
    Info(String),
    Error(String),
}

struct LoadedImage {
    source: SourceImage,
    pixels: DynamicImage,
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct EcgApp {
    config: AppConfig,
    loaded: Option<LoadedImage>,
    texture: Option<egui::TextureHandle>,

    session: Option<AnnotationSession>,
    /// Region being adjusted for the next lead, in image coordinates.
    selection: Option<egui::Rect>,

    metadata: PatientMetadata,
    age_known: bool,
    age: u32,
    date_text: String,
    scale_factor: f64,

    dispatcher: Option<Dispatcher>,
    results: Results,
    status: Status,
    /// Cancel was asked for on a complete session; waiting for the operator.
    confirm_cancel: bool,

    drag: DragState,

    // pan & zoom
    pan: egui::Vec2,
    zoom: f32,
    panning: bool,
    fit_pending: bool,
}

impl EcgApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig, image_path: Option<PathBuf>) -> Self {
        let mut status = Status::Idle;
        let dispatcher = match HttpEcgServices::new(&config)
            .map_err(Error::from)
            .and_then(|services| Dispatcher::new(Arc::new(services)).map_err(Error::from))
        {
            Ok(dispatcher) => Some(dispatcher.with_repaint(cc.egui_ctx.clone())),
            Err(e) => {
                tracing::error!(error = %e, "Could not start the service client");
                status = Status::Error(format!("Conversion disabled: {e}"));
                None
            }
        };

        let metadata = PatientMetadata::default();
        let mut app = Self {
            date_text: metadata.recording_date.format("%Y-%m-%d").to_string(),
            scale_factor: config.pixels_per_mv,
            config,
            loaded: None,
            texture: None,
            session: None,
            selection: None,
            metadata,
            age_known: false,
            age: 50,
            dispatcher,
            results: Results::default(),
            status,
            confirm_cancel: false,
            drag: DragState::None,
            pan: egui::Vec2::ZERO,
            zoom: 1.0,
            panning: false,
            fit_pending: false,
        };
        if let Some(path) = image_path {
            app.load_image(&path);
        }
        app
    }

    fn load_image(&mut self, path: &Path) {
        match SourceImage::load(path) {
            Ok((source, pixels)) => {
                let size = source.size();
                self.metadata.source_file = source.file_name().to_string();
                self.session = Some(AnnotationSession::new(size));
                self.selection = Some(box_to_rect(initial_selection(size)));
                self.status = Status::Info(format!("Loaded {}, draw lead I", source.file_name()));
                self.loaded = Some(LoadedImage { source, pixels });
                self.texture = None;
                self.drag = DragState::None;
                self.fit_pending = true;
                self.on_session_changed();
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load image");
                self.status = Status::Error(format!("Could not open {}: {e}", path.display()));
            }
        }
    }

    /// Anything in flight was built from the previous annotation.
    fn on_session_changed(&mut self) {
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.invalidate();
        }
        self.results.clear();
    }

    fn display_ratio(&self) -> ScaleRatio {
        ScaleRatio::uniform(f64::from(self.zoom))
    }

    fn apply_session_event(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let outcome = match session.handle(event) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.status = Status::Error(e.to_string());
                return;
            }
        };
        let next = session.next_lead();
        let fresh_box = box_to_rect(initial_selection(session.image_size()));

        match &outcome {
            SessionOutcome::Captured(boundary) => {
                self.status = Status::Info(match next {
                    Some(lead) => format!("{} captured, draw {lead}", boundary.lead_name),
                    None => format!("{} captured", boundary.lead_name),
                });
                self.selection = Some(fresh_box);
            }
            SessionOutcome::Completed(_) => {
                self.status = Status::Info("All 12 leads delimited, ready to convert".into());
                self.selection = None;
            }
            SessionOutcome::Undone(Some(boundary)) => {
                self.status = Status::Info(format!("Removed {}, redraw it", boundary.lead_name));
                self.selection = Some(box_to_rect(boundary.bounds()));
            }
            SessionOutcome::Undone(None) => return,
            SessionOutcome::Cancelled { .. } => {
                self.status = Status::Info("Annotation cancelled, draw lead I".into());
                self.selection = Some(fresh_box);
            }
        }
        self.on_session_changed();
    }

    /// Hand the pending selection to the session as a display-space rectangle:
    /// the image scaled by the current zoom, origin at its top-left corner.
    fn confirm_selection(&mut self) {
        let Some(selection) = self.selection else {
            return;
        };
        let zoom = f64::from(self.zoom);
        let rect = DisplayRect::new(
            f64::from(selection.min.x) * zoom,
            f64::from(selection.min.y) * zoom,
            f64::from(selection.width()) * zoom,
            f64::from(selection.height()) * zoom,
        );
        self.apply_session_event(SessionEvent::RegionCaptured {
            rect,
            ratio: self.display_ratio(),
        });
    }

    fn request_conversion(&mut self) -> Result<(), Error> {
        let recording_date = NaiveDate::parse_from_str(self.date_text.trim(), "%Y-%m-%d")
            .map_err(|_| ValidationError::InvalidRecordingDate(self.date_text.clone()))?;
        self.metadata.recording_date = recording_date;
        self.metadata.patient_age = self.age_known.then_some(self.age);

        let (Some(session), Some(loaded)) = (&self.session, &self.loaded) else {
            return Err(StateError::NoImage.into());
        };
        let payload = assemble(session, &self.metadata, &loaded.source, self.scale_factor)?;
        let dispatcher = self
            .dispatcher
            .as_mut()
            .ok_or(StateError::ServicesUnavailable)?;
        dispatcher.submit_conversion(payload)?;
        self.status = Status::Info("Converting…".into());
        Ok(())
    }

    fn request_analysis(&mut self) -> Result<(), Error> {
        let record = self.results.record().cloned().ok_or(StateError::NoRecord)?;
        let dispatcher = self
            .dispatcher
            .as_mut()
            .ok_or(StateError::ServicesUnavailable)?;
        dispatcher.submit_analysis(record)?;
        self.status = Status::Info("Analysing…".into());
        Ok(())
    }

    fn export(&self) -> Result<Option<ReportPaths>, Error> {
        let loaded = self.loaded.as_ref().ok_or(StateError::NoImage)?;
        let session = self.session.as_ref().ok_or(StateError::NoImage)?;
        let (Some(record), Some(analysis)) = (self.results.record(), self.results.analysis()) else {
            return Err(StateError::NoRecord.into());
        };
        let Some(dir) = rfd::FileDialog::new().pick_folder() else {
            return Ok(None);
        };
        export_report(
            &dir,
            loaded.source.file_name(),
            &loaded.pixels,
            session.boundaries(),
            record,
            analysis,
        )
        .map(Some)
    }

    fn handle_service_events(&mut self) {
        let events = match self.dispatcher.as_mut() {
            Some(dispatcher) => dispatcher.poll(),
            None => return,
        };
        for event in events {
            match self.results.apply(event) {
                Ok(RequestKind::Conversion) => {
                    if let Some(record) = self.results.record() {
                        let rec = record.record();
                        tracing::info!(record_id = %rec.record_id, leads = rec.leads.len(), "Record digitized");
                        self.status = Status::Info(format!(
                            "Record {} digitized ({} leads)",
                            rec.record_id,
                            rec.leads.len()
                        ));
                    }
                }
                Ok(RequestKind::Analysis) => {
                    if let Some(analysis) = self.results.analysis() {
                        tracing::info!(rhythm = %analysis.rhythm, "Analysis received");
                        self.status = Status::Info(format!("Analysis: {}", analysis.rhythm));
                    }
                }
                Err(e) => {
                    self.status = Status::Error(e.user_message().to_string());
                }
            }
        }
    }

    fn request_cancel(&mut self) {
        match cancel_action(self.session.as_ref()) {
            CancelAction::Ignore => {}
            CancelAction::Confirm => self.confirm_cancel = true,
            CancelAction::Cancel => self.apply_session_event(SessionEvent::SessionCancelled),
        }
    }

    fn cancel_dialog(&mut self, ctx: &egui::Context) {
        if !self.confirm_cancel {
            return;
        }
        egui::Window::new("Discard annotation?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label("All 12 lead boxes and any converted record will be discarded.");
                ui.horizontal(|ui| {
                    if ui.button("Discard").clicked() {
                        self.confirm_cancel = false;
                        self.apply_session_event(SessionEvent::SessionCancelled);
                    }
                    if ui.button("Keep").clicked() {
                        self.confirm_cancel = false;
                    }
                });
            });
    }

    fn is_busy(&self, kind: RequestKind) -> bool {
        self.dispatcher.as_ref().map_or(true, |d| d.is_busy(kind))
    }

    /// Convert image-space coords to screen-space
    fn image_to_screen(&self, canvas_rect: egui::Rect, img_pos: egui::Pos2) -> egui::Pos2 {
        let center = canvas_rect.center();
        center + self.pan + (img_pos.to_vec2() - self.image_half_extent()) * self.zoom
    }

    /// Convert screen-space coords to image-space
    fn screen_to_image(&self, canvas_rect: egui::Rect, screen_pos: egui::Pos2) -> egui::Pos2 {
        let rel = screen_pos - canvas_rect.center() - self.pan;
        (rel / self.zoom + self.image_half_extent()).to_pos2()
    }

    fn image_half_extent(&self) -> egui::Vec2 {
        match &self.loaded {
            Some(loaded) => {
                let size = loaded.source.size();
                egui::vec2(size.width as f32, size.height as f32) * 0.5
            }
            None => egui::Vec2::ZERO,
        }
    }

    fn selection_on_screen(&self, canvas_rect: egui::Rect) -> Option<egui::Rect> {
        self.selection.map(|sel| {
            egui::Rect::from_min_max(
                self.image_to_screen(canvas_rect, sel.min),
                self.image_to_screen(canvas_rect, sel.max),
            )
        })
    }

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.texture.is_some() {
            return;
        }
        if let Some(loaded) = &self.loaded {
            let rgba = loaded.pixels.to_rgba8();
            let size = [rgba.width() as usize, rgba.height() as usize];
            let pixels = rgba.as_flat_samples();
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());
            self.texture = Some(ctx.load_texture("ecg-scan", color_image, egui::TextureOptions::LINEAR));
        }
    }

    fn fit_to_canvas(&mut self, canvas_rect: egui::Rect) {
        if let Some(loaded) = &self.loaded {
            let size = loaded.source.size();
            let fit = (canvas_rect.width() / size.width.max(1) as f32)
                .min(canvas_rect.height() / size.height.max(1) as f32);
            self.zoom = (fit * 0.95).clamp(0.05, 10.0);
            self.pan = egui::Vec2::ZERO;
        }
        self.fit_pending = false;
    }

    fn draw_boundaries(&self, painter: &egui::Painter, canvas_rect: egui::Rect) {
        let Some(session) = &self.session else {
            return;
        };
        let origin = self.image_to_screen(canvas_rect, egui::Pos2::ZERO);
        let ratio = self.display_ratio();
        for boundary in session.boundaries() {
            let d = to_display(boundary.bounds(), ratio);
            let rect = egui::Rect::from_min_size(
                origin + egui::vec2(d.x as f32, d.y as f32),
                egui::vec2(d.w as f32, d.h as f32),
            );
            painter.rect_stroke(
                rect,
                0.0,
                egui::Stroke::new(2.0, CAPTURED_COLOR),
                egui::StrokeKind::Middle,
            );
            painter.text(
                rect.left_top() + egui::vec2(4.0, 2.0),
                egui::Align2::LEFT_TOP,
                boundary.lead_name.as_str(),
                egui::FontId::proportional(14.0),
                CAPTURED_COLOR,
            );
        }
    }

    fn draw_selection(&self, painter: &egui::Painter, canvas_rect: egui::Rect) {
        let (Some(rect), Some(lead)) = (
            self.selection_on_screen(canvas_rect),
            self.session.as_ref().and_then(|s| s.next_lead()),
        ) else {
            return;
        };
        painter.rect_stroke(
            rect,
            0.0,
            egui::Stroke::new(2.0, SELECTION_COLOR),
            egui::StrokeKind::Middle,
        );
        painter.text(
            rect.left_top() - egui::vec2(0.0, 4.0),
            egui::Align2::LEFT_BOTTOM,
            format!("{lead}  (Enter to confirm)"),
            egui::FontId::proportional(14.0),
            SELECTION_COLOR,
        );
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Open image…").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Images", &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"])
                    .pick_file()
                {
                    self.load_image(&path);
                }
            }
            ui.separator();

            let ((captured, total), next) = match &self.session {
                Some(session) => (session.progress(), session.next_lead()),
                None => ((0, 0), None),
            };
            match (&self.session, next) {
                (None, _) => ui.label("No image"),
                (Some(_), Some(lead)) => {
                    ui.label(format!("Lead {}/{total}: draw {lead}", captured + 1))
                }
                (Some(_), None) => ui.label("All leads delimited"),
            };

            if ui
                .add_enabled(self.selection.is_some() && next.is_some(), egui::Button::new("Confirm"))
                .clicked()
            {
                self.confirm_selection();
            }
            if ui.add_enabled(captured > 0, egui::Button::new("Undo")).clicked() {
                self.apply_session_event(SessionEvent::UndoRequested);
            }
            if ui
                .add_enabled(captured > 0, egui::Button::new("Cancel annotation"))
                .clicked()
            {
                self.request_cancel();
            }
            ui.separator();
            ui.label(format!("Zoom: {:.0}%", self.zoom * 100.0));
            if ui.button("Fit").clicked() {
                self.fit_pending = true;
            }
        });
    }

    fn patient_form(&mut self, ui: &mut egui::Ui) {
        ui.heading("Patient");
        egui::Grid::new("patient_form")
            .num_columns(2)
            .spacing([8.0, 6.0])
            .show(ui, |ui| {
                ui.label("Name");
                ui.text_edit_singleline(&mut self.metadata.patient_name);
                ui.end_row();

                ui.label("Age");
                ui.horizontal(|ui| {
                    ui.checkbox(&mut self.age_known, "");
                    ui.add_enabled(
                        self.age_known,
                        egui::DragValue::new(&mut self.age).range(0..=130),
                    );
                });
                ui.end_row();

                ui.label("Sex");
                egui::ComboBox::from_id_salt("patient_sex")
                    .selected_text(match self.metadata.patient_sex {
                        Some(Sex::Male) => "Male",
                        Some(Sex::Female) => "Female",
                        None => "Unspecified",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut self.metadata.patient_sex, None, "Unspecified");
                        ui.selectable_value(&mut self.metadata.patient_sex, Some(Sex::Male), "Male");
                        ui.selectable_value(&mut self.metadata.patient_sex, Some(Sex::Female), "Female");
                    });
                ui.end_row();

                ui.label("Recorded");
                ui.text_edit_singleline(&mut self.date_text);
                ui.end_row();

                ui.label("Note");
                ui.text_edit_multiline(&mut self.metadata.note);
                ui.end_row();

                ui.label("Scale");
                ui.add(
                    egui::DragValue::new(&mut self.scale_factor)
                        .range(MIN_SCALE_FACTOR..=1000.0)
                        .speed(0.5)
                        .suffix(" px/mV"),
                );
                ui.end_row();
            });
    }

    fn actions(&mut self, ui: &mut egui::Ui) {
        let complete = self.session.as_ref().is_some_and(|s| s.is_complete());
        let converting = self.is_busy(RequestKind::Conversion);
        let analysing = self.is_busy(RequestKind::Analysis);

        ui.horizontal(|ui| {
            if ui
                .add_enabled(complete && !converting, egui::Button::new("Convert"))
                .clicked()
            {
                if let Err(e) = self.request_conversion() {
                    tracing::warn!(error = %e, "Conversion not started");
                    self.status = Status::Error(e.to_string());
                }
            }
            if ui
                .add_enabled(
                    self.results.record().is_some() && !analysing,
                    egui::Button::new("Analyse"),
                )
                .clicked()
            {
                if let Err(e) = self.request_analysis() {
                    self.status = Status::Error(e.to_string());
                }
            }
            if ui
                .add_enabled(self.results.analysis().is_some(), egui::Button::new("Export report…"))
                .clicked()
            {
                match self.export() {
                    Ok(Some(paths)) => {
                        self.status = Status::Info(format!("Report saved to {}", paths.summary.display()));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Report export failed");
                        self.status = Status::Error(format!("Export failed: {e}"));
                    }
                }
            }
            if converting || analysing {
                ui.spinner();
            }
        });

        match &self.status {
            Status::Idle => {}
            Status::Info(msg) => {
                ui.label(msg);
            }
            Status::Error(msg) => {
                ui.colored_label(egui::Color32::LIGHT_RED, msg);
            }
        }
    }

    fn analysis_table(&self, ui: &mut egui::Ui) {
        let Some(analysis) = self.results.analysis() else {
            return;
        };
        ui.heading("Analysis");
        ui.label(format!("Rhythm: {}", analysis.rhythm));
        ui.label(format!("Frontal axis: {:.0}°", analysis.cardiac_axis.frontal));
        TableBuilder::new(ui)
            .striped(true)
            .vscroll(false)
            .column(Column::remainder())
            .column(Column::auto())
            .header(18.0, |mut header| {
                header.col(|ui| {
                    ui.strong("Diagnosis");
                });
                header.col(|ui| {
                    ui.strong("Probability");
                });
            })
            .body(|mut body| {
                for (label, p) in analysis.ranked() {
                    body.row(18.0, |mut row| {
                        row.col(|ui| {
                            ui.label(label);
                        });
                        row.col(|ui| {
                            ui.label(format!("{:.1}%", p * 100.0));
                        });
                    });
                }
            });
    }

    /// One strip per lead in canonical order, baseline at the strip centre.
    fn lead_previews(&self, ui: &mut egui::Ui, record: &ConvertedRecord) {
        egui::ScrollArea::vertical().show(ui, |ui| {
            for lead in CANONICAL_LEAD_ORDER {
                let (rect, _) = ui.allocate_exact_size(
                    egui::vec2(ui.available_width(), PREVIEW_STRIP_HEIGHT),
                    egui::Sense::hover(),
                );
                let painter = ui.painter_at(rect);
                let label_color = ui.visuals().text_color();
                painter.text(
                    rect.left_center() + egui::vec2(4.0, 0.0),
                    egui::Align2::LEFT_CENTER,
                    lead.as_str(),
                    egui::FontId::monospace(13.0),
                    label_color,
                );
                let baseline = rect.center().y;
                painter.hline(
                    (rect.left() + PREVIEW_LABEL_WIDTH)..=rect.right(),
                    baseline,
                    egui::Stroke::new(0.5, egui::Color32::from_gray(90)),
                );

                let Some(data) = record.lead(lead) else {
                    painter.text(
                        rect.center(),
                        egui::Align2::CENTER_CENTER,
                        "no samples",
                        egui::FontId::proportional(12.0),
                        egui::Color32::GRAY,
                    );
                    continue;
                };
                let preview = render_preview(
                    &data.samples,
                    self.scale_factor,
                    f64::from(baseline),
                    self.config.preview_points,
                );
                if preview.is_empty() {
                    continue;
                }
                let x_step = (rect.width() - PREVIEW_LABEL_WIDTH) / preview.len().max(2) as f32;
                let points: Vec<egui::Pos2> = preview
                    .points()
                    .map(|p| {
                        egui::pos2(
                            rect.left() + PREVIEW_LABEL_WIDTH + p.index as f32 * x_step,
                            p.y as f32,
                        )
                    })
                    .collect();
                painter.add(egui::Shape::line(points, egui::Stroke::new(1.2, TRACE_COLOR)));
            }
        });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CancelAction {
    Ignore,
    Confirm,
    Cancel,
}

/// Nothing to cancel on an empty session. A complete one asks first.
fn cancel_action(session: Option<&AnnotationSession>) -> CancelAction {
    match session {
        Some(s) if s.is_complete() => CancelAction::Confirm,
        Some(s) if s.progress().0 > 0 => CancelAction::Cancel,
        _ => CancelAction::Ignore,
    }
}

fn box_to_rect(b: PixelBox) -> egui::Rect {
    egui::Rect::from_min_max(
        egui::pos2(b.x1 as f32, b.y1 as f32),
        egui::pos2(b.x2 as f32, b.y2 as f32),
    )
}

// ── eframe App impl ────────────────────────────────────────────────────────

impl eframe::App for EcgApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_service_events();
        self.ensure_texture(ctx);

        // Keyboard shortcuts, unless a form field has focus
        if !ctx.wants_keyboard_input() {
            let (confirm, undo, cancel) = ctx.input(|i| {
                (
                    i.key_pressed(egui::Key::Enter),
                    i.modifiers.command && i.key_pressed(egui::Key::Z),
                    i.key_pressed(egui::Key::Escape),
                )
            });
            if confirm && !self.confirm_cancel {
                self.confirm_selection();
            }
            if undo && !self.confirm_cancel {
                self.apply_session_event(SessionEvent::UndoRequested);
            }
            if cancel && self.confirm_cancel {
                self.confirm_cancel = false;
            } else if cancel {
                self.request_cancel();
            }
        }
        self.cancel_dialog(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));

        egui::SidePanel::left("form")
            .resizable(true)
            .default_width(300.0)
            .show(ctx, |ui| {
                self.patient_form(ui);
                ui.separator();
                self.actions(ui);
                ui.separator();
                self.analysis_table(ui);
            });

        if let Some(record) = self.results.record().cloned() {
            egui::TopBottomPanel::bottom("preview")
                .resizable(true)
                .default_height(320.0)
                .show(ctx, |ui| {
                    ui.heading(format!("Record {}", record.record().record_id));
                    self.lead_previews(ui, &record);
                });
        }

        // Canvas
        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) =
                ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            let canvas_rect = response.rect;
            if self.fit_pending {
                self.fit_to_canvas(canvas_rect);
            }

            painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

            if let Some(ref tex) = self.texture {
                let img_rect = egui::Rect::from_min_max(
                    self.image_to_screen(canvas_rect, egui::Pos2::ZERO),
                    self.image_to_screen(canvas_rect, (self.image_half_extent() * 2.0).to_pos2()),
                );
                painter.image(
                    tex.id(),
                    img_rect,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            }

            self.draw_boundaries(&painter, canvas_rect);
            if let DragState::Drawing { start } = self.drag {
                if let Some(current) = response.hover_pos() {
                    painter.rect_stroke(
                        egui::Rect::from_two_pos(start, current),
                        0.0,
                        egui::Stroke::new(2.0, SELECTION_COLOR),
                        egui::StrokeKind::Middle,
                    );
                }
            } else {
                self.draw_selection(&painter, canvas_rect);
            }

            // Handle pan (middle mouse button)
            let middle_down = ctx.input(|i| i.pointer.middle_down());
            if middle_down {
                self.pan += ctx.input(|i| i.pointer.delta());
                self.panning = true;
            } else {
                self.panning = false;
            }

            // Handle zoom (scroll wheel)
            let scroll_delta = ctx.input(|i| i.smooth_scroll_delta.y);
            if scroll_delta != 0.0 && response.hovered() {
                let zoom_factor = 1.0 + scroll_delta * 0.002;
                let new_zoom = (self.zoom * zoom_factor).clamp(0.05, 10.0);
                if let Some(cursor) = response.hover_pos() {
                    let cursor_rel = cursor - canvas_rect.center() - self.pan;
                    self.pan -= cursor_rel * (new_zoom / self.zoom - 1.0);
                }
                self.zoom = new_zoom;
            }

            let annotating = self
                .session
                .as_ref()
                .is_some_and(|s| s.next_lead().is_some());
            if self.panning || !annotating {
                return;
            }

            if response.drag_started_by(egui::PointerButton::Primary) {
                if let Some(pos) = response.hover_pos() {
                    let inside = self
                        .selection_on_screen(canvas_rect)
                        .is_some_and(|r| r.contains(pos));
                    self.drag = if inside {
                        DragState::Moving
                    } else {
                        DragState::Drawing { start: pos }
                    };
                }
            }

            if response.dragged_by(egui::PointerButton::Primary) {
                if let (DragState::Moving, Some(sel)) = (&self.drag, self.selection.as_mut()) {
                    *sel = sel.translate(response.drag_delta() / self.zoom);
                }
            }

            if response.drag_stopped_by(egui::PointerButton::Primary) {
                if let DragState::Drawing { start } = self.drag {
                    if let Some(end) = response
                        .hover_pos()
                        .or(ctx.input(|i| i.pointer.latest_pos()))
                    {
                        if (end - start).length() > 5.0 {
                            let img_start = self.screen_to_image(canvas_rect, start);
                            let img_end = self.screen_to_image(canvas_rect, end);
                            self.selection = Some(egui::Rect::from_two_pos(img_start, img_end));
                        }
                    }
                }
                self.drag = DragState::None;
            }
        });
    }
}
