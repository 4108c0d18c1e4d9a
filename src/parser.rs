//! Review page parsing with `scraper` selectors.
//!
//! Strategies only move HTML around; everything that knows the shape of a
//! review page lives here.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::error::FetchError;
use crate::models::{FirmInfo, Review, ReviewPage};

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("bad selector '{}': {:?}", css, e)))
}

fn regex(pattern: &str) -> Result<Regex, FetchError> {
    Regex::new(pattern).map_err(|e| FetchError::Parse(e.to_string()))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: ElementRef<'_>, css: &str) -> Result<Option<String>, FetchError> {
    let sel = selector(css)?;
    Ok(scope.select(&sel).next().map(text_of).filter(|t| !t.is_empty()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Extract firm metadata from the header of a review page.
pub fn parse_firm(html: &str, url: &str) -> Result<FirmInfo, FetchError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let name = first_text(root, r#"[class*="title_displayName"]"#)?
        .ok_or_else(|| FetchError::Parse("no business unit header".to_string()))?;

    let rating = first_text(root, r#"p[data-rating-typography="true"]"#)?
        .and_then(|t| t.parse::<f32>().ok())
        .unwrap_or(0.0);

    let total_reviews = first_text(root, r#"p[data-reviews-count-typography="true"]"#)?
        .map(|t| parse_count(&t))
        .transpose()?
        .flatten()
        .unwrap_or(0);

    let header_text = first_text(root, "div#business-unit-title")?.unwrap_or_default();
    let claimed = header_text.contains("Claimed profile");
    let category = first_text(root, r#"div#business-unit-title [class*="breadcrumb"] a"#)?;

    let description = first_text(
        root,
        r#"[class*="companyDetailsCard"] p[data-relevant-review-text-typography="true"]"#,
    )?
    .or(first_text(root, r#"[class*="companyDetailsCard"] p"#)?);

    let website_sel = selector(r#"a[data-visit-website-button-link="true"]"#)?;
    let website = document
        .select(&website_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    Ok(FirmInfo {
        name,
        source_url: url.to_string(),
        rating,
        total_reviews,
        rating_distribution: parse_rating_distribution(&document)?,
        claimed,
        website,
        category,
        description,
    })
}

/// "1,234 reviews" → 1234
fn parse_count(text: &str) -> Result<Option<u32>, FetchError> {
    let re = regex(r"([\d,]+)")?;
    Ok(re
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok()))
}

fn parse_rating_distribution(document: &Html) -> Result<BTreeMap<u8, f32>, FetchError> {
    let row_sel = selector("div[data-reviews-overview-paper] label")?;
    let label_sel = selector("p[data-rating-label-typography]")?;
    let percent_sel = selector("p[data-rating-distribution-row-percentage-typography]")?;

    let mut distribution = BTreeMap::new();
    for row in document.select(&row_sel) {
        let Some(label) = row.select(&label_sel).next().map(text_of) else {
            continue;
        };
        // Typically "5-star"
        let Some(star) = label.split('-').next().and_then(|s| s.trim().parse::<u8>().ok()) else {
            continue;
        };

        let percent_text = row.select(&percent_sel).next().map(text_of).unwrap_or_default();
        // "<1%" counts as zero
        let percent = if percent_text.contains('<') {
            0.0
        } else {
            percent_text.trim_end_matches('%').trim().parse::<f32>().unwrap_or(0.0)
        };
        distribution.insert(star, percent);
    }
    Ok(distribution)
}

/// Extract all review cards. Cards that fail the basic record checks are
/// dropped with a warning.
pub fn parse_reviews(html: &str) -> Result<Vec<Review>, FetchError> {
    let document = Html::parse_document(html);
    let card_sel = selector(r#"article[data-service-review-card-paper="true"]"#)?;
    let parts = CardSelectors::new()?;

    let mut reviews = Vec::new();
    for card in document.select(&card_sel) {
        let review = parts.parse_card(card);
        let problems = review.problems();
        if problems.is_empty() {
            reviews.push(review);
        } else {
            warn!(review_id = %review.source_id, ?problems, "Dropping review card");
        }
    }
    Ok(reviews)
}

struct CardSelectors {
    review_link: Selector,
    title_link: Selector,
    author: Selector,
    rating: Selector,
    rating_img: Selector,
    content_section: Selector,
    paragraph: Selector,
    title: Selector,
    time: Selector,
    reply_text: Selector,
    reply_time: Selector,
    location: Selector,
    author_reviews: Selector,
    review_id_re: Regex,
    rated_re: Regex,
    count_re: Regex,
}

impl CardSelectors {
    fn new() -> Result<Self, FetchError> {
        Ok(Self {
            review_link: selector(r#"a[href*="/reviews/"]"#)?,
            title_link: selector(r#"a[data-review-title-typography="true"]"#)?,
            author: selector(r#"span[data-consumer-name-typography="true"]"#)?,
            rating: selector("[data-service-review-rating]")?,
            rating_img: selector("img[alt]")?,
            content_section: selector(r#"[class*="reviewContent"]"#)?,
            paragraph: selector("p")?,
            title: selector(r#"h2[data-service-review-title-typography="true"]"#)?,
            time: selector("time[datetime]")?,
            reply_text: selector("p[data-service-review-business-reply-text-typography]")?,
            reply_time: selector(r#"[class*="replyInfo"] time[datetime]"#)?,
            location: selector(r#"span[data-consumer-country-typography="true"]"#)?,
            author_reviews: selector(r#"span[data-consumer-reviews-count-typography="true"]"#)?,
            review_id_re: regex(r"/reviews/([a-f0-9]+)")?,
            rated_re: regex(r"Rated (\d+) out of")?,
            count_re: regex(r"(\d+)")?,
        })
    }

    fn parse_card(&self, card: ElementRef<'_>) -> Review {
        let source_id = self.review_id(card);

        let author_name = card
            .select(&self.author)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Anonymous".to_string());

        let rating = self.rating(card);

        let content_section = card.select(&self.content_section).next();
        let paragraphs: Vec<String> = content_section
            .map(|section| section.select(&self.paragraph).map(text_of).collect())
            .unwrap_or_default();

        let content = paragraphs
            .iter()
            .find(|p| !p.is_empty() && !p.starts_with("Date of experience"))
            .cloned()
            .unwrap_or_default();

        let date_of_experience = paragraphs
            .iter()
            .find(|p| p.contains("Date of experience"))
            .and_then(|p| parse_experience_date(p));

        let title = card
            .select(&self.title)
            .next()
            .map(text_of)
            .unwrap_or_default();

        let date_posted = card
            .select(&self.time)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let verified = card.text().any(|t| t.contains("Verified"));

        let reply_content = card
            .select(&self.reply_text)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty());
        let reply_date = card
            .select(&self.reply_time)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(parse_timestamp);

        let author_location = card
            .select(&self.location)
            .next()
            .map(text_of)
            .filter(|t| !t.is_empty());
        let author_reviews_count = card
            .select(&self.author_reviews)
            .next()
            .map(text_of)
            .and_then(|t| self.count_re.captures(&t).and_then(|c| c[1].parse().ok()))
            .or(Some(1));

        Review {
            source_id,
            author_name,
            rating,
            title,
            content,
            date_posted,
            verified,
            date_of_experience,
            reply_content,
            reply_date,
            author_reviews_count,
            author_location,
        }
    }

    fn review_id(&self, card: ElementRef<'_>) -> String {
        let from_link = card
            .select(&self.review_link)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| self.review_id_re.captures(href).map(|c| c[1].to_string()));

        from_link
            .or_else(|| {
                card.select(&self.title_link)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .and_then(|href| href.rsplit('/').next())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }

    fn rating(&self, card: ElementRef<'_>) -> u8 {
        if let Some(value) = card
            .select(&self.rating)
            .next()
            .and_then(|e| e.value().attr("data-service-review-rating"))
            .and_then(|v| v.trim().parse().ok())
        {
            return value;
        }

        card.select(&self.rating_img)
            .filter_map(|img| img.value().attr("alt"))
            .find_map(|alt| self.rated_re.captures(alt).and_then(|c| c[1].parse().ok()))
            .unwrap_or(0)
    }
}

/// "Date of experience: October 25, 2023"
fn parse_experience_date(text: &str) -> Option<NaiveDate> {
    let (_, date_text) = text.split_once("Date of experience")?;
    let date_text = date_text.trim_start_matches(':').trim();
    NaiveDate::parse_from_str(date_text, "%B %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(date_text, "%b %d, %Y"))
        .ok()
}

/// A "next page" link that is present and not disabled.
pub fn has_next_page(html: &str) -> Result<bool, FetchError> {
    let document = Html::parse_document(html);
    let next_sel = selector(r#"a[name="pagination-button-next"]"#)?;

    Ok(document.select(&next_sel).next().is_some_and(|a| {
        let el = a.value();
        let disabled_class = el.classes().any(|c| c.contains("disabled"));
        let disabled_attr = el.attr("aria-disabled") == Some("true");
        !disabled_class && !disabled_attr && el.attr("href").is_some()
    }))
}

/// Total page count, from a "Page X of Y" summary or failing that the
/// highest numbered pagination button.
pub fn total_pages(html: &str) -> Result<Option<u32>, FetchError> {
    let document = Html::parse_document(html);

    let nav_sel = selector("nav")?;
    let summary_re = regex(r"Page\s+\d+\s+of\s+([\d,]+)")?;
    for nav in document.select(&nav_sel) {
        let text = text_of(nav);
        if let Some(total) = summary_re
            .captures(&text)
            .and_then(|c| c[1].replace(',', "").parse().ok())
        {
            return Ok(Some(total));
        }
    }

    let button_sel = selector(r#"a[name^="pagination-button-"]"#)?;
    Ok(document
        .select(&button_sel)
        .filter_map(|a| text_of(a).parse::<u32>().ok())
        .max())
}

/// Reviews plus pagination signals for one page.
pub fn parse_review_page(html: &str) -> Result<ReviewPage, FetchError> {
    Ok(ReviewPage {
        reviews: parse_reviews(html)?,
        has_next: has_next_page(html)?,
        total_pages: total_pages(html)?,
    })
}

#[cfg(test)]
pub(crate) mod samples {
    /// Minimal review page with `count` cards and optional next link.
    pub fn review_page(page: u32, count: usize, has_next: bool, total: Option<u32>) -> String {
        let mut cards = String::new();
        for i in 0..count {
            cards.push_str(&format!(
                r#"<article data-service-review-card-paper="true">
                  <span data-consumer-name-typography="true">Author {page}-{i}</span>
                  <span data-consumer-country-typography="true">GB</span>
                  <span data-consumer-reviews-count-typography="true">4 reviews</span>
                  <div class="styles_reviewHeader__x" data-service-review-rating="4">
                    <img alt="Rated 4 out of 5 stars">
                  </div>
                  <time datetime="2024-05-0{day}T10:00:00.000Z">May</time>
                  <div class="styles_reviewContent__x">
                    <a href="/reviews/abc{page:03}{i:03}" data-review-title-typography="true">
                      <h2 data-service-review-title-typography="true">Title {i}</h2>
                    </a>
                    <p>Review number {i} on page {page}, fast payouts.</p>
                    <p>Date of experience: April 28, 2024</p>
                  </div>
                </article>"#,
                page = page,
                i = i,
                day = (i % 9) + 1,
            ));
        }

        let next = if has_next {
            format!(r#"<a name="pagination-button-next" href="?page={}">Next</a>"#, page + 1)
        } else {
            r#"<a name="pagination-button-next" aria-disabled="true" class="link_disabled__x">Next</a>"#
                .to_string()
        };
        let summary = total
            .map(|t| format!("<span>Page {} of {}</span>", page, t))
            .unwrap_or_default();

        format!(
            "<html><body>{}<nav aria-label=\"Pagination\">{}{}</nav></body></html>",
            cards, summary, next
        )
    }
}
