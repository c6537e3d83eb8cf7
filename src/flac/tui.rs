/*
 * Copyright (c) 2022 McSib
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Template for the per-page download bar.
const PAGE_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {pos}/{len}";

/// Used when a template fails to parse.
const FALLBACK_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar} {pos}/{len}";

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style, falling back to a plain bar if it is invalid.
    ///
    /// # Arguments
    ///
    /// * `msg_template`: The template to use.
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        match self.progress_style.clone().template(msg_template) {
            Ok(style) => self.progress_style = style,
            Err(err) => {
                warn!("Template error with '{}': {}. Using fallback template.", msg_template, err);
                self.progress_style = match ProgressStyle::default_bar().template(FALLBACK_TEMPLATE) {
                    Ok(style) => style,
                    Err(err) => {
                        error!("Fallback template also failed: {}. Using default bar.", err);
                        ProgressStyle::default_bar()
                    }
                };
            }
        }
        self
    }

    pub(crate) fn progress_chars(mut self, chars: &str) -> Self {
        self.progress_style = self.progress_style.progress_chars(chars);
        self
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_bar(),
        }
    }
}

/// A builder that helps in initializing and configuring a new [ProgressBar] for use.
pub(crate) struct ProgressBarBuilder {
    progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    pub(crate) fn new(len: u64) -> Self {
        Self {
            progress_bar: ProgressBar::new(len),
        }
    }

    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    /// Sets the draw target (output) of the progress bar to the target given.
    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    pub(crate) fn message(self, message: String) -> Self {
        self.progress_bar.set_message(message);
        self
    }

    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

/// Creates the bar shown while one page of a keyword is being downloaded.
///
/// # Arguments
///
/// * `len`: Number of tasks on the page.
/// * `keyword`: The keyword being searched.
/// * `page`: The page number.
/// * `visible`: Draws to stderr when true, otherwise the bar is hidden.
pub(crate) fn page_progress_bar(len: u64, keyword: &str, page: u32, visible: bool) -> ProgressBar {
    let builder = ProgressBarBuilder::new(len);
    if !visible {
        return builder.draw_target(ProgressDrawTarget::hidden()).build();
    }

    builder
        .style(
            ProgressStyleBuilder::default()
                .template(PAGE_TEMPLATE)
                .progress_chars("=>-")
                .build(),
        )
        .draw_target(ProgressDrawTarget::stderr())
        .message(format!("{} page {}", style(keyword).cyan().bold(), page))
        .steady_tick(Duration::from_millis(100))
        .build()
}
