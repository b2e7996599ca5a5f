//! Static runtime support sources for generated programs
//!
//! The generated `.c` file drives a small cooperative scheduler and calls
//! into native builtins; both live here as plain C text. `swell build`
//! writes them next to the generated pair so `cc *.c` produces a binary.

/// `swell_runtime.h` - scheduler types, singletons and builtin prototypes
pub const RUNTIME_HEADER: &str = r#"#ifndef SWELL_RUNTIME_H
#define SWELL_RUNTIME_H

#include <stdbool.h>

typedef void *val_t;

typedef struct {
  val_t value;
  bool ready;
} future_t;

typedef void (*func_t)();

typedef struct {
  void *state;
  func_t func;
} closure_t;

typedef struct {
  int tag;
  val_t payload;
} swell_union_t;

struct swell_runtime {
  closure_t upcoming_calls[256];
  int next_call;
  int current_call;
  closure_t after_delay[32];
  int next_delay;
};

/* Asynchronous natives keep the generated calling convention. */
struct swell_sleep_state {
  future_t r[1];
  future_t *result[1];
  closure_t caller;
  bool conditions[1];
};

extern val_t kSingletonClock;
extern val_t kSingletonStream;
extern val_t kSingletonFileSystem;

void swell_runtime_init(struct swell_runtime *rt);
void swell_runtime_schedule(struct swell_runtime *rt, closure_t closure);
void swell_runtime_loop(struct swell_runtime *rt);
void swell_exit(struct swell_runtime *rt, void *state);
char *swell_strdup(const char *text);

void swell_print(struct swell_runtime *rt, val_t stream, val_t message, val_t *stream_out);
void swell_readLine(struct swell_runtime *rt, val_t stream, val_t *stream_out, val_t *line_out);
void swell_itoa(struct swell_runtime *rt, val_t value, val_t *text_out);
void swell_concat(struct swell_runtime *rt, val_t a, val_t b, val_t *result);
void swell_add(struct swell_runtime *rt, val_t a, val_t b, val_t *result);
void swell_parseNumber(struct swell_runtime *rt, val_t text, val_t *result);
void swell_sleep(struct swell_runtime *rt, struct swell_sleep_state *state);
void swell_fork(struct swell_runtime *rt, val_t clock, val_t *a_out, val_t *b_out);
void swell_join(struct swell_runtime *rt, val_t a, val_t b, val_t *result);

#endif
"#;

/// `swell_runtime.c` - the scheduler and the builtin implementations
pub const RUNTIME_SOURCE: &str = r#"#include <assert.h>
#include <ctype.h>
#include <stdbool.h>
#include <stdint.h>
#include <stdio.h>
#include <stdlib.h>
#include <string.h>
#include <unistd.h>

#include "swell_runtime.h"

val_t kSingletonClock = (void *)0x50;
val_t kSingletonStream = (void *)0x40;
val_t kSingletonFileSystem = (void *)0x60;

void swell_runtime_init(struct swell_runtime *rt) {
  rt->next_call = 0;
  rt->current_call = 0;
  rt->next_delay = 0;
}

void swell_runtime_schedule(struct swell_runtime *rt, closure_t closure) {
  assert(closure.func != NULL);
  assert(rt->next_call < 256);

  /* Scheduling the same state twice can fire a continuation after it has
   * freed itself; elide the duplicate. */
  for (int i = rt->current_call; i < rt->next_call; i++) {
    if (rt->upcoming_calls[i].state == closure.state) {
      return;
    }
  }

  rt->upcoming_calls[rt->next_call] = closure;
  rt->next_call++;
}

void swell_runtime_loop(struct swell_runtime *rt) {
  int i = 0;
  while (true) {
    for (; i < rt->next_call; i++) {
      rt->current_call = i;
      rt->upcoming_calls[i].func(rt, rt->upcoming_calls[i].state);
    }
    if (rt->next_delay > 0) {
      usleep(100000);
      for (int d = 0; d < rt->next_delay; d++) {
        swell_runtime_schedule(rt, rt->after_delay[d]);
      }
      rt->next_delay = 0;
    } else {
      break;
    }
  }

  fprintf(stderr, "** finished without calling exit **\n");
  exit(1);
}

void swell_exit(struct swell_runtime *rt, void *state) {
  (void)rt;
  (void)state;
  exit(0);
}

char *swell_strdup(const char *text) {
  size_t len = strlen(text);
  char *copy = malloc(len + 1);
  memcpy(copy, text, len + 1);
  return copy;
}

void swell_print(struct swell_runtime *rt, val_t stream, val_t message, val_t *stream_out) {
  (void)rt;
  assert(stream == kSingletonStream);
  printf("%s\n", (char *)message);
  free(message);
  *stream_out = stream;
}

void swell_readLine(struct swell_runtime *rt, val_t stream, val_t *stream_out, val_t *line_out) {
  (void)rt;
  assert(stream == kSingletonStream);
  char buffer[256];
  if (fgets(buffer, sizeof(buffer), stdin) == NULL) {
    buffer[0] = '\0';
  }
  buffer[strcspn(buffer, "\r\n")] = '\0';
  *line_out = swell_strdup(buffer);
  *stream_out = stream;
}

void swell_itoa(struct swell_runtime *rt, val_t value, val_t *text_out) {
  (void)rt;
  char *text = malloc(32);
  snprintf(text, 31, "%ld", (long)(intptr_t)value);
  *text_out = text;
}

void swell_concat(struct swell_runtime *rt, val_t a, val_t b, val_t *result) {
  (void)rt;
  size_t la = strlen(a), lb = strlen(b);
  char *buf = malloc(la + lb + 1);
  memcpy(&buf[0], a, la);
  memcpy(&buf[la], b, lb);
  buf[la + lb] = '\0';
  free(a);
  free(b);
  *result = buf;
}

void swell_add(struct swell_runtime *rt, val_t a, val_t b, val_t *result) {
  (void)rt;
  *result = (void *)((intptr_t)a + (intptr_t)b);
}

/* Union[String, Integer]: arm 0 is the text, arm 1 the parsed value. */
void swell_parseNumber(struct swell_runtime *rt, val_t text, val_t *result) {
  (void)rt;
  swell_union_t *u = malloc(sizeof(swell_union_t));
  const char *s = text;
  bool numeric = *s != '\0';
  for (const char *p = s; *p; p++) {
    if (!isdigit((unsigned char)*p)) {
      numeric = false;
      break;
    }
  }
  if (numeric) {
    u->tag = 1;
    u->payload = (void *)(intptr_t)atol(s);
    free(text);
  } else {
    u->tag = 0;
    u->payload = text;
  }
  *result = u;
}

void swell_sleep(struct swell_runtime *rt, struct swell_sleep_state *state) {
  assert(rt->next_delay < 32);
  assert(state->r[0].value == kSingletonClock);

  *state->result[0] = state->r[0];

  rt->after_delay[rt->next_delay++] = state->caller;
  free(state);
}

void swell_fork(struct swell_runtime *rt, val_t clock, val_t *a_out, val_t *b_out) {
  (void)rt;
  assert(clock == kSingletonClock);
  *a_out = clock;
  *b_out = clock;
}

void swell_join(struct swell_runtime *rt, val_t a, val_t b, val_t *result) {
  (void)rt;
  assert(a == kSingletonClock);
  assert(b == kSingletonClock);
  *result = a;
}
"#;

/// The support files `swell build` writes next to the generated pair
pub fn support_files() -> [(&'static str, &'static str); 2] {
    [
        ("swell_runtime.h", RUNTIME_HEADER),
        ("swell_runtime.c", RUNTIME_SOURCE),
    ]
}
