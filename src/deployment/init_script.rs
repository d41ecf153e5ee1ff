use std::time::Duration;

use rand::Rng;

use crate::core::constants::{SERVICE_DIR, SERVICE_NAME, STARTUP_JITTER_MAX_SECS};

/// Uniform delay in `[0, STARTUP_JITTER_MAX_SECS)` so a fleet-wide reboot
/// does not start every service at once.
pub fn startup_jitter() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(0..STARTUP_JITTER_MAX_SECS))
}

/// SysV init script for the service, sleeping `jitter` before starting it.
pub fn render(jitter: Duration) -> String {
    format!(
        r#"#!/bin/sh
### BEGIN INIT INFO
# Provides:          {name}
# Required-Start:    $remote_fs $syslog
# Required-Stop:     $remote_fs $syslog
# Default-Start:     2 3 4 5
# Default-Stop:      0 1 6
# Short-Description: Start daemon at boot time
# Description:       Enable service provided by daemon.
### END INIT INFO

DAEMON_PATH="{dir}"
DAEMON="$DAEMON_PATH/{name}"
DAEMON_NAME="{name}"
PIDFILE="/var/run/$DAEMON_NAME.pid"
LOGFILE="/var/log/$DAEMON_NAME.log"

. /lib/lsb/init-functions

do_start() {{
    log_daemon_msg "Starting $DAEMON_NAME"
    sleep {delay}
    start-stop-daemon --start --background --make-pidfile --pidfile $PIDFILE --chdir $DAEMON_PATH --exec $DAEMON -- >> $LOGFILE 2>&1
    log_end_msg $?
}}

do_stop() {{
    log_daemon_msg "Stopping $DAEMON_NAME"
    start-stop-daemon --stop --pidfile $PIDFILE --retry 10
    log_end_msg $?
}}

case "$1" in
  start)
    do_start
    ;;
  stop)
    do_stop
    ;;
  restart)
    do_stop
    do_start
    ;;
  status)
    status_of_proc -p $PIDFILE $DAEMON $DAEMON_NAME && exit 0 || exit $?
    ;;
  *)
    echo "Usage: /etc/init.d/$DAEMON_NAME {{start|stop|restart|status}}"
    exit 1
    ;;
esac
exit 0
"#,
        name = SERVICE_NAME,
        dir = SERVICE_DIR,
        delay = jitter.as_secs(),
    )
}
