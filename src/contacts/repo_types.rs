use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, Duration, Month};

/// Contact record. Not owned by any user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone: Option<String>,
    pub birthday: Option<Date>,
    pub additional_data: Option<String>,
    pub avatar_url: Option<String>,
}

/// Fields for a new contact, already validated.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone: Option<String>,
    pub birthday: Option<Date>,
    pub additional_data: Option<String>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<Date>,
    pub additional_data: Option<String>,
    pub avatar_url: Option<String>,
}

impl ContactPatch {
    pub fn apply(self, c: &mut Contact) {
        if let Some(v) = self.name {
            c.name = v;
        }
        if let Some(v) = self.surname {
            c.surname = v;
        }
        if let Some(v) = self.email {
            c.email = v;
        }
        if self.phone.is_some() {
            c.phone = self.phone;
        }
        if self.birthday.is_some() {
            c.birthday = self.birthday;
        }
        if self.additional_data.is_some() {
            c.additional_data = self.additional_data;
        }
        if self.avatar_url.is_some() {
            c.avatar_url = self.avatar_url;
        }
    }
}

/// The birthday's anniversary in `year`. Feb 29 falls on Feb 28 in common years.
fn anniversary(birthday: Date, year: i32) -> Date {
    Date::from_calendar_date(year, birthday.month(), birthday.day()).unwrap_or_else(|_| {
        // only Feb 29 can be missing from a year
        Date::from_calendar_date(year, Month::February, 28).unwrap_or(birthday)
    })
}

/// First anniversary of `birthday` on or after `today`.
pub fn next_birthday(birthday: Date, today: Date) -> Date {
    let this_year = anniversary(birthday, today.year());
    if this_year >= today {
        this_year
    } else {
        anniversary(birthday, today.year() + 1)
    }
}

/// Whether the next anniversary lands in `today ..= today + days`.
pub fn birthday_within(birthday: Date, today: Date, days: i64) -> bool {
    let next = next_birthday(birthday, today);
    next - today <= Duration::days(days)
}

/// Match used by search: case-insensitive substring of name, surname or email.
pub fn matches_query(c: &Contact, query: &str) -> bool {
    let q = query.to_lowercase();
    [&c.name, &c.surname, &c.email]
        .iter()
        .any(|field| field.to_lowercase().contains(&q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn contact(name: &str, surname: &str, email: &str) -> Contact {
        Contact {
            id: 1,
            name: name.into(),
            surname: surname.into(),
            email: email.into(),
            phone: None,
            birthday: None,
            additional_data: None,
            avatar_url: None,
        }
    }

    #[test]
    fn birthday_three_days_out_is_upcoming() {
        assert!(birthday_within(date!(1990 - 03 - 13), date!(2024 - 03 - 10), 7));
    }

    #[test]
    fn birthday_ten_days_out_is_not() {
        assert!(!birthday_within(date!(1990 - 03 - 20), date!(2024 - 03 - 10), 7));
    }

    #[test]
    fn window_includes_today_and_last_day() {
        let today = date!(2024 - 06 - 01);
        assert!(birthday_within(date!(1985 - 06 - 01), today, 7));
        assert!(birthday_within(date!(1985 - 06 - 08), today, 7));
        assert!(!birthday_within(date!(1985 - 06 - 09), today, 7));
    }

    #[test]
    fn window_crosses_month_boundary() {
        assert!(birthday_within(date!(1992 - 02 - 02), date!(2025 - 01 - 28), 7));
    }

    #[test]
    fn window_crosses_year_boundary() {
        let today = date!(2024 - 12 - 29);
        assert_eq!(next_birthday(date!(2000 - 01 - 02), today), date!(2025 - 01 - 02));
        assert!(birthday_within(date!(2000 - 01 - 02), today, 7));
    }

    #[test]
    fn yesterday_is_a_year_away() {
        let today = date!(2024 - 05 - 10);
        assert_eq!(next_birthday(date!(1970 - 05 - 09), today), date!(2025 - 05 - 09));
        assert!(!birthday_within(date!(1970 - 05 - 09), today, 7));
    }

    #[test]
    fn leap_day_birthday_in_common_year() {
        let today = date!(2025 - 02 - 25);
        assert_eq!(next_birthday(date!(2000 - 02 - 29), today), date!(2025 - 02 - 28));
        assert!(birthday_within(date!(2000 - 02 - 29), today, 7));
        // leap years keep the real date
        assert_eq!(
            next_birthday(date!(2000 - 02 - 29), date!(2028 - 02 - 01)),
            date!(2028 - 02 - 29)
        );
    }

    #[test]
    fn search_is_case_insensitive_over_three_fields() {
        let doe = contact("John", "Doe", "john@example.com");
        let smith = contact("Anna", "Smith", "anna@example.com");
        assert!(matches_query(&doe, "doe"));
        assert!(!matches_query(&smith, "doe"));
        assert!(matches_query(&smith, "ANNA@EX"));
        assert!(matches_query(&doe, "oh"));
    }

    #[test]
    fn patch_leaves_missing_fields_alone() {
        let mut c = contact("John", "Doe", "john@example.com");
        c.avatar_url = Some("https://img/old.png".into());
        ContactPatch {
            phone: Some("+380501112233".into()),
            ..Default::default()
        }
        .apply(&mut c);
        assert_eq!(c.name, "John");
        assert_eq!(c.phone.as_deref(), Some("+380501112233"));
        assert_eq!(c.avatar_url.as_deref(), Some("https://img/old.png"));
    }
}
